use config::RateLimitConfig;
use domain::{LimitWindow, RateLimitDecision, Timestamp, UserId, UserRateStats, WindowUsage};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// 时间戳保留时长（与日窗口一致）
pub fn default_retention() -> chrono::Duration {
    LimitWindow::Day.duration()
}

/// 消息限流器
///
/// 为每个用户维护按时间递增的发送时间戳，按分钟/小时/天三个滑动窗口计数。
/// 另外维护封禁名单和长消息冷却。所有状态仅存在于内存中。
pub struct MessageRateLimiter {
    config: RwLock<RateLimitConfig>,
    retention: chrono::Duration,
    clock: Arc<dyn Clock>,
    /// 用户发送时间戳，队首最旧
    user_timestamps: RwLock<HashMap<UserId, VecDeque<Timestamp>>>,
    /// 用户冷却截止时间
    cooldowns: RwLock<HashMap<UserId, Timestamp>>,
    blocked_users: RwLock<HashSet<UserId>>,
}

impl MessageRateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: RwLock::new(config),
            retention: default_retention(),
            clock,
            user_timestamps: RwLock::new(HashMap::new()),
            cooldowns: RwLock::new(HashMap::new()),
            blocked_users: RwLock::new(HashSet::new()),
        }
    }

    /// 调整时间戳保留时长，短于一天时按一天处理
    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention.max(default_retention());
        self
    }

    pub fn config(&self) -> RateLimitConfig {
        read(&self.config).clone()
    }

    pub fn update_config(&self, config: RateLimitConfig) {
        info!(
            per_minute = config.max_messages_per_minute,
            per_hour = config.max_messages_per_hour,
            per_day = config.max_messages_per_day,
            "限流配置已更新"
        );
        *write(&self.config) = config;
    }

    /// 检查用户当前是否可以发送一条长度为 `message_length` 的消息
    ///
    /// 依次检查封禁、冷却、长度上限，最后是分钟、小时、天三个窗口。
    /// 返回第一个不满足的条件；本方法不改变计数。
    pub fn can_send_message(&self, user_id: &UserId, message_length: usize) -> RateLimitDecision {
        let now = self.clock.now();
        let timestamps = read(&self.user_timestamps);
        self.evaluate(user_id, message_length, now, timestamps.get(user_id))
    }

    /// 记录一次发送；长消息触发冷却
    pub fn record_message(&self, user_id: &UserId, message_length: usize) {
        let now = self.clock.now();
        let mut timestamps = write(&self.user_timestamps);
        self.append(&mut timestamps, user_id, message_length, now);
    }

    /// 检查并在允许时立即记录，两步在同一把写锁内完成
    pub fn try_record_message(&self, user_id: &UserId, message_length: usize) -> RateLimitDecision {
        let now = self.clock.now();
        let mut timestamps = write(&self.user_timestamps);
        let decision = self.evaluate(user_id, message_length, now, timestamps.get(user_id));
        if decision.can_send {
            self.append(&mut timestamps, user_id, message_length, now);
        }
        decision
    }

    fn evaluate(
        &self,
        user_id: &UserId,
        message_length: usize,
        now: Timestamp,
        sent: Option<&VecDeque<Timestamp>>,
    ) -> RateLimitDecision {
        if self.is_blocked(user_id) {
            debug!(%user_id, "封禁用户尝试发送消息");
            return RateLimitDecision::denied("User is blocked from sending messages", None);
        }

        if let Some(until) = self.active_cooldown(user_id, now) {
            debug!(%user_id, %until, "用户处于冷却期");
            return RateLimitDecision::denied("Cooldown active", Some(until));
        }

        let config = self.config();
        if message_length > config.max_message_length {
            return RateLimitDecision::denied(
                format!(
                    "Message too long (max {} characters)",
                    config.max_message_length
                ),
                None,
            );
        }

        let Some(sent) = sent else {
            return RateLimitDecision::allowed();
        };

        // 报告最先超出的窗口，但重置时间取所有超出窗口中最晚的一个
        let mut exceeded: Option<(LimitWindow, u32, Timestamp)> = None;
        for window in LimitWindow::ALL {
            let max = limit_for(&config, window);
            let (count, oldest) = count_in_window(sent, now, window);
            if count >= max as usize {
                // 队列单调递增，窗口内最旧的一条滑出后该窗口即空出一个名额
                let reset_at = oldest.map_or(now, |t| t + window.duration());
                debug!(%user_id, %window, count, max, "超出发送频率限制");
                exceeded = Some(match exceeded {
                    Some((first, first_max, latest)) => (first, first_max, latest.max(reset_at)),
                    None => (window, max, reset_at),
                });
            }
        }

        match exceeded {
            Some((window, max, reset_at)) => {
                RateLimitDecision::window_exceeded(window, max, reset_at)
            }
            None => RateLimitDecision::allowed(),
        }
    }

    fn append(
        &self,
        timestamps: &mut HashMap<UserId, VecDeque<Timestamp>>,
        user_id: &UserId,
        message_length: usize,
        now: Timestamp,
    ) {
        let sent = timestamps.entry(user_id.clone()).or_default();
        // 时钟回拨时保持队列单调
        let at = sent.back().map_or(now, |last| (*last).max(now));
        sent.push_back(at);

        let config = self.config();
        if message_length > config.long_message_threshold {
            let until = now
                .checked_add_signed(config.cooldown())
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
            write(&self.cooldowns).insert(user_id.clone(), until);
            debug!(%user_id, message_length, %until, "长消息触发冷却");
        }
    }

    pub fn block_user(&self, user_id: &UserId) -> bool {
        let inserted = write(&self.blocked_users).insert(user_id.clone());
        if inserted {
            info!(%user_id, "用户已被封禁");
        }
        inserted
    }

    pub fn unblock_user(&self, user_id: &UserId) -> bool {
        let removed = write(&self.blocked_users).remove(user_id);
        if removed {
            info!(%user_id, "用户已解除封禁");
        }
        removed
    }

    pub fn is_blocked(&self, user_id: &UserId) -> bool {
        read(&self.blocked_users).contains(user_id)
    }

    /// 返回仍然有效的冷却截止时间，顺带清除已过期的记录
    fn active_cooldown(&self, user_id: &UserId, now: Timestamp) -> Option<Timestamp> {
        let until = read(&self.cooldowns).get(user_id).copied()?;
        if now <= until {
            return Some(until);
        }

        let mut cooldowns = write(&self.cooldowns);
        if cooldowns.get(user_id).is_some_and(|t| now > *t) {
            cooldowns.remove(user_id);
        }
        None
    }

    /// 获取用户当前状态
    pub fn get_user_status(&self, user_id: &UserId) -> UserRateStats {
        let now = self.clock.now();
        let config = self.config();
        let timestamps = read(&self.user_timestamps);
        let sent = timestamps.get(user_id);

        let windows = LimitWindow::ALL
            .into_iter()
            .map(|window| WindowUsage {
                window,
                used: sent
                    .map(|s| count_in_window(s, now, window).0)
                    .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
                limit: limit_for(&config, window),
            })
            .collect();

        UserRateStats {
            user_id: user_id.clone(),
            blocked: self.is_blocked(user_id),
            cooldown_until: read(&self.cooldowns)
                .get(user_id)
                .copied()
                .filter(|until| now <= *until),
            windows,
        }
    }

    /// 重置用户配额（管理员功能），封禁状态不受影响
    pub fn reset_user_quota(&self, user_id: &UserId) {
        write(&self.user_timestamps).remove(user_id);
        write(&self.cooldowns).remove(user_id);
        info!(%user_id, "用户配额已重置");
    }

    /// 清理过期的时间戳和冷却记录（防止内存无限增长）
    ///
    /// 返回被移除的时间戳数量。
    pub fn cleanup_expired_quotas(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let mut removed = 0;

        {
            let mut timestamps = write(&self.user_timestamps);
            for sent in timestamps.values_mut() {
                let stale = sent.partition_point(|t| *t <= cutoff);
                sent.drain(..stale);
                removed += stale;
            }
            timestamps.retain(|_, sent| !sent.is_empty());
        }

        write(&self.cooldowns).retain(|_, until| now <= *until);

        if removed > 0 {
            info!(removed, "已清理过期的发送记录");
        } else {
            debug!("没有需要清理的发送记录");
        }
        removed
    }

    /// 当前有发送记录的用户数
    pub fn tracked_users(&self) -> usize {
        read(&self.user_timestamps).len()
    }
}

impl Default for MessageRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default(), Arc::new(SystemClock))
    }
}

fn limit_for(config: &RateLimitConfig, window: LimitWindow) -> u32 {
    match window {
        LimitWindow::Minute => config.max_messages_per_minute,
        LimitWindow::Hour => config.max_messages_per_hour,
        LimitWindow::Day => config.max_messages_per_day,
    }
}

/// 统计窗口 `(now - window, now]` 内的条数，以及窗口内最旧的时间戳
fn count_in_window(
    sent: &VecDeque<Timestamp>,
    now: Timestamp,
    window: LimitWindow,
) -> (usize, Option<Timestamp>) {
    let since = now - window.duration();
    let first = sent.partition_point(|t| *t <= since);
    (sent.len() - first, sent.get(first).copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn limiter_with(config: RateLimitConfig) -> (MessageRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MessageRateLimiter::new(config, clock.clone()), clock)
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn test_rate_limiting() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            max_messages_per_minute: 5,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");

        // 发送5条消息应该成功
        for i in 0..5 {
            let decision = limiter.can_send_message(&user_id, 10);
            assert!(decision.can_send, "Message {} should be allowed", i + 1);
            limiter.record_message(&user_id, 10);
        }

        // 第6条消息应该被限流
        let decision = limiter.can_send_message(&user_id, 10);
        assert!(!decision.can_send);
        assert_eq!(decision.limit, Some(LimitWindow::Minute));
        assert!(decision.reason.unwrap().contains("per minute"));
    }

    #[test]
    fn test_check_does_not_consume_quota() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            max_messages_per_minute: 1,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");

        for _ in 0..10 {
            assert!(limiter.can_send_message(&user_id, 1).can_send);
        }
        assert_eq!(limiter.tracked_users(), 0);
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter_with(RateLimitConfig {
            max_messages_per_minute: 2,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");
        let first = clock.now();

        limiter.record_message(&user_id, 1);
        clock.advance(Duration::seconds(20));
        limiter.record_message(&user_id, 1);

        let decision = limiter.can_send_message(&user_id, 1);
        assert!(!decision.can_send);
        // 最旧的一条滑出窗口时恢复
        assert_eq!(decision.reset_at, Some(first + Duration::minutes(1)));

        clock.set(first + Duration::minutes(1));
        assert!(limiter.can_send_message(&user_id, 1).can_send);
    }

    #[test]
    fn test_reset_at_waits_for_every_exceeded_window() {
        let (limiter, clock) = limiter_with(RateLimitConfig {
            max_messages_per_minute: 2,
            max_messages_per_hour: 2,
            max_messages_per_day: 2,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");
        let first = clock.now();
        limiter.record_message(&user_id, 1);
        limiter.record_message(&user_id, 1);

        let decision = limiter.can_send_message(&user_id, 1);
        assert!(!decision.can_send);
        assert_eq!(decision.limit, Some(LimitWindow::Minute));
        assert!(decision.reason.unwrap().contains("per minute"));
        assert_eq!(decision.reset_at, Some(first + Duration::days(1)));

        // 分钟窗口已恢复，但小时和天窗口仍然超出
        clock.set(first + Duration::minutes(1));
        let decision = limiter.can_send_message(&user_id, 1);
        assert!(!decision.can_send);
        assert_eq!(decision.limit, Some(LimitWindow::Hour));

        clock.set(first + Duration::days(1));
        assert!(limiter.can_send_message(&user_id, 1).can_send);
    }

    #[test]
    fn test_hour_and_day_windows() {
        let (limiter, clock) = limiter_with(RateLimitConfig {
            max_messages_per_minute: 2,
            max_messages_per_hour: 3,
            max_messages_per_day: 4,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");

        for _ in 0..3 {
            limiter.record_message(&user_id, 1);
            clock.advance(Duration::minutes(2));
        }
        let decision = limiter.can_send_message(&user_id, 1);
        assert_eq!(decision.limit, Some(LimitWindow::Hour));
        assert!(decision.reason.unwrap().contains("per hour"));

        clock.advance(Duration::hours(2));
        limiter.record_message(&user_id, 1);
        let decision = limiter.can_send_message(&user_id, 1);
        assert_eq!(decision.limit, Some(LimitWindow::Day));

        clock.advance(Duration::days(1));
        assert!(limiter.can_send_message(&user_id, 1).can_send);
    }

    #[test]
    fn test_blocked_user_is_always_denied() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::default());
        let user_id = user("troll");

        assert!(limiter.block_user(&user_id));
        assert!(!limiter.block_user(&user_id));
        for _ in 0..3 {
            let decision = limiter.can_send_message(&user_id, 1);
            assert!(!decision.can_send);
            assert!(decision.reason.unwrap().contains("blocked"));
        }

        assert!(limiter.unblock_user(&user_id));
        assert!(limiter.can_send_message(&user_id, 1).can_send);
    }

    #[test]
    fn test_long_message_cooldown() {
        let (limiter, clock) = limiter_with(RateLimitConfig {
            cooldown_ms: 5000,
            long_message_threshold: 1000,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");

        limiter.record_message(&user_id, 1000);
        assert!(limiter.can_send_message(&user_id, 1).can_send);

        limiter.record_message(&user_id, 1001);
        let sent_at = clock.now();
        let decision = limiter.can_send_message(&user_id, 1);
        assert!(!decision.can_send);
        assert_eq!(decision.reset_at, Some(sent_at + Duration::seconds(5)));

        // 截止时刻本身仍在冷却中
        clock.advance(Duration::seconds(5));
        assert!(!limiter.can_send_message(&user_id, 1).can_send);

        clock.advance(Duration::milliseconds(1));
        assert!(limiter.can_send_message(&user_id, 1).can_send);
        assert_eq!(limiter.get_user_status(&user_id).cooldown_until, None);
    }

    #[test]
    fn test_message_too_long() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::default());
        let decision = limiter.can_send_message(&user("u1"), 2001);
        assert!(!decision.can_send);
        assert!(decision.reason.unwrap().contains("max 2000"));
        assert!(limiter.can_send_message(&user("u1"), 2000).can_send);
    }

    #[test]
    fn test_user_status() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::default());
        let user_id = user("u1");

        let status = limiter.get_user_status(&user_id);
        assert!(status.windows.iter().all(|w| w.used == 0));

        limiter.record_message(&user_id, 5);
        limiter.record_message(&user_id, 5);

        let status = limiter.get_user_status(&user_id);
        let minute = status.usage(LimitWindow::Minute).unwrap();
        assert_eq!(minute.used, 2);
        assert_eq!(minute.remaining(), 8);
        assert!(!status.blocked);
    }

    #[test]
    fn test_reset_user_quota() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            max_messages_per_minute: 1,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");
        limiter.record_message(&user_id, 1500);
        limiter.block_user(&user_id);

        limiter.reset_user_quota(&user_id);
        let status = limiter.get_user_status(&user_id);
        assert_eq!(status.usage(LimitWindow::Minute).unwrap().used, 0);
        assert_eq!(status.cooldown_until, None);
        assert!(status.blocked);
    }

    #[test]
    fn test_cleanup_drops_old_timestamps() {
        let (limiter, clock) = limiter_with(RateLimitConfig::default());
        let old = user("old");
        let fresh = user("fresh");

        limiter.record_message(&old, 1);
        limiter.record_message(&old, 1);
        clock.advance(Duration::hours(23));
        limiter.record_message(&fresh, 1);
        clock.advance(Duration::hours(1));

        assert_eq!(limiter.cleanup_expired_quotas(), 2);
        assert_eq!(limiter.tracked_users(), 1);
        assert_eq!(limiter.cleanup_expired_quotas(), 0);
    }

    #[test]
    fn test_try_record_message() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            max_messages_per_minute: 2,
            ..RateLimitConfig::default()
        });
        let user_id = user("u1");

        assert!(limiter.try_record_message(&user_id, 1).can_send);
        assert!(limiter.try_record_message(&user_id, 1).can_send);
        assert!(!limiter.try_record_message(&user_id, 1).can_send);
        let status = limiter.get_user_status(&user_id);
        assert_eq!(status.usage(LimitWindow::Minute).unwrap().used, 2);
    }

    #[test]
    fn test_update_config_applies_immediately() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::default());
        let user_id = user("u1");
        limiter.record_message(&user_id, 1);
        limiter.update_config(RateLimitConfig {
            max_messages_per_minute: 1,
            ..RateLimitConfig::default()
        });
        assert!(!limiter.can_send_message(&user_id, 1).can_send);
    }
}
