//! 主应用程序入口
//!
//! 从标准输入逐行读取待审核的消息或管理命令，每行输出一条 JSON 结果。
//! 输入结束后停止清理任务并退出。

mod input;

use anyhow::Context;
use application::{
    ApplicationError, CleanupSweeper, Clock, MessageRateLimiter, MessageValidator,
    ModerationService, ModerationServiceDependencies, SystemClock,
};
use config::GuardConfig;
use domain::{LimitWindow, Timestamp, UserId, UserRateStats, ValidationMetadata};
use input::{parse_line, AdminAction, Input};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Verdict {
    Accepted {
        content: String,
        warnings: Vec<String>,
        metadata: ValidationMetadata,
    },
    Rejected {
        errors: Vec<String>,
        warnings: Vec<String>,
        sanitized_content: Option<String>,
    },
    RateLimited {
        reason: Option<String>,
        reset_at: Option<Timestamp>,
        limit: Option<LimitWindow>,
    },
    Admin {
        action: &'static str,
        user_id: UserId,
        changed: bool,
    },
    Stats(UserRateStats),
    Invalid {
        error: String,
    },
}

fn handle(service: &ModerationService, input: Input) -> Verdict {
    match input {
        Input::Submit(command) => match service.submit(command) {
            Ok(outcome) => Verdict::Accepted {
                content: outcome.content,
                warnings: outcome.warnings,
                metadata: outcome.metadata,
            },
            Err(ApplicationError::Rejected(result)) => Verdict::Rejected {
                errors: result.errors,
                warnings: result.warnings,
                sanitized_content: result.sanitized_content,
            },
            Err(ApplicationError::RateLimited(decision)) => Verdict::RateLimited {
                reason: decision.reason,
                reset_at: decision.reset_at,
                limit: decision.limit,
            },
        },
        Input::Admin(action, user_id) => {
            let limiter = service.rate_limiter();
            let changed = match action {
                AdminAction::Block => limiter.block_user(&user_id),
                AdminAction::Unblock => limiter.unblock_user(&user_id),
                AdminAction::Reset => {
                    limiter.reset_user_quota(&user_id);
                    true
                }
                AdminAction::Stats => return Verdict::Stats(limiter.get_user_status(&user_id)),
            };
            Verdict::Admin {
                action: action.as_str(),
                user_id,
                changed,
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，输出到 stderr 以免混入结果
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = GuardConfig::load().context("加载配置失败")?;
    tracing::info!(
        per_minute = config.rate_limit.max_messages_per_minute,
        per_hour = config.rate_limit.max_messages_per_hour,
        per_day = config.rate_limit.max_messages_per_day,
        "配置加载完成"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rate_limiter = Arc::new(
        MessageRateLimiter::new(config.rate_limit.clone(), clock.clone())
            .with_retention(config.sweep.retention()),
    );
    let validator = Arc::new(MessageValidator::new(config.validation.clone(), clock));
    let service = ModerationService::new(ModerationServiceDependencies {
        validator,
        rate_limiter: rate_limiter.clone(),
    });

    let sweeper = CleanupSweeper::spawn(rate_limiter, config.sweep.interval());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        let verdict = match parse_line(&line) {
            Ok(Some(input)) => handle(&service, input),
            Ok(None) => continue,
            Err(err) => Verdict::Invalid {
                error: err.to_string(),
            },
        };
        let mut out = serde_json::to_string(&verdict)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    sweeper.shutdown().await;
    tracing::info!("输入结束，消息守卫退出");
    Ok(())
}
