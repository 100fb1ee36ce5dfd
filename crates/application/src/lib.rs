//! 应用层实现。
//!
//! 提供消息内容校验、按用户的滑动窗口限流、过期记录清理，
//! 以及把两者串联起来的审核服务。

pub mod clock;
pub mod error;
pub mod message_validator;
pub mod rate_limiter;
pub mod services;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ApplicationError, ApplicationResult};
pub use message_validator::MessageValidator;
pub use rate_limiter::MessageRateLimiter;
pub use services::{
    ModerationOutcome, ModerationService, ModerationServiceDependencies, SubmitMessageCommand,
};
pub use sweeper::CleanupSweeper;
