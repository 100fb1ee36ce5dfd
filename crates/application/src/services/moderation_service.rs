//! 消息审核服务
//!
//! 串联内容校验与发送限流：先校验内容，再按实际投递文本的长度检查配额，
//! 两者都通过后才记录这次发送。

use domain::{RoomId, UserId, ValidationMetadata};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApplicationError, ApplicationResult};
use crate::message_validator::MessageValidator;
use crate::rate_limiter::MessageRateLimiter;

/// 提交消息命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMessageCommand {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub content: String,
}

/// 审核通过的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationOutcome {
    /// 可以投递的文本（必要时已屏蔽脏词）
    pub content: String,
    pub warnings: Vec<String>,
    pub metadata: ValidationMetadata,
}

pub struct ModerationServiceDependencies {
    pub validator: Arc<MessageValidator>,
    pub rate_limiter: Arc<MessageRateLimiter>,
}

pub struct ModerationService {
    validator: Arc<MessageValidator>,
    rate_limiter: Arc<MessageRateLimiter>,
}

impl ModerationService {
    pub fn new(deps: ModerationServiceDependencies) -> Self {
        Self {
            validator: deps.validator,
            rate_limiter: deps.rate_limiter,
        }
    }

    pub fn validator(&self) -> &Arc<MessageValidator> {
        &self.validator
    }

    pub fn rate_limiter(&self) -> &Arc<MessageRateLimiter> {
        &self.rate_limiter
    }

    pub fn submit(&self, command: SubmitMessageCommand) -> ApplicationResult<ModerationOutcome> {
        let SubmitMessageCommand {
            user_id,
            room_id,
            content,
        } = command;

        let result = self
            .validator
            .validate_message(&content, &user_id, &room_id);
        if !result.is_valid {
            return Err(ApplicationError::rejected(result));
        }

        let deliverable = result.effective_content(&content).to_owned();
        let length = deliverable.chars().count();

        let decision = self.rate_limiter.try_record_message(&user_id, length);
        if !decision.can_send {
            warn!(%user_id, %room_id, reason = ?decision.reason, "消息被限流");
            return Err(ApplicationError::rate_limited(decision));
        }

        info!(%user_id, %room_id, length, "消息审核通过");

        Ok(ModerationOutcome {
            content: deliverable,
            warnings: result.warnings,
            metadata: result.metadata,
        })
    }
}
