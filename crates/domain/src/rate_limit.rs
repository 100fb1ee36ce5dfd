//! 限流相关的领域类型
//!
//! 滑动窗口的定义、限流判定结果以及单个用户的配额快照。

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 滑动窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
    Minute,
    Hour,
    Day,
}

impl LimitWindow {
    /// 按从紧到松的顺序排列
    pub const ALL: [LimitWindow; 3] = [LimitWindow::Minute, LimitWindow::Hour, LimitWindow::Day];

    pub fn duration(self) -> Duration {
        match self {
            LimitWindow::Minute => Duration::minutes(1),
            LimitWindow::Hour => Duration::hours(1),
            LimitWindow::Day => Duration::days(1),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LimitWindow::Minute => "per minute",
            LimitWindow::Hour => "per hour",
            LimitWindow::Day => "per day",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LimitWindow::Minute => "minute",
            LimitWindow::Hour => "hour",
            LimitWindow::Day => "day",
        }
    }
}

impl fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次 `can_send_message` 的判定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub can_send: bool,
    /// 被拒绝时的原因
    pub reason: Option<String>,
    /// 被拒绝时，最早可以再次发送的时间
    pub reset_at: Option<Timestamp>,
    /// 触发的窗口（仅窗口配额超限时存在）
    pub limit: Option<LimitWindow>,
}

impl RateLimitDecision {
    pub fn allowed() -> Self {
        Self {
            can_send: true,
            reason: None,
            reset_at: None,
            limit: None,
        }
    }

    pub fn denied(reason: impl Into<String>, reset_at: Option<Timestamp>) -> Self {
        Self {
            can_send: false,
            reason: Some(reason.into()),
            reset_at,
            limit: None,
        }
    }

    pub fn window_exceeded(window: LimitWindow, max: u32, reset_at: Timestamp) -> Self {
        Self {
            can_send: false,
            reason: Some(format!(
                "Rate limit exceeded: maximum {} messages {}",
                max,
                window.label()
            )),
            reset_at: Some(reset_at),
            limit: Some(window),
        }
    }
}

/// 单个窗口内的用量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub window: LimitWindow,
    pub used: u32,
    pub limit: u32,
}

impl WindowUsage {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// 用户配额快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRateStats {
    pub user_id: UserId,
    pub blocked: bool,
    pub cooldown_until: Option<Timestamp>,
    pub windows: Vec<WindowUsage>,
}

impl UserRateStats {
    pub fn usage(&self, window: LimitWindow) -> Option<&WindowUsage> {
        self.windows.iter().find(|usage| usage.window == window)
    }
}
