//! 统一配置中心
//!
//! 提供消息守卫的全局配置，包括：
//! - 发送频率限制
//! - 消息内容校验规则
//! - 过期记录清理
//!
//! 加载顺序：默认值 -> 可选配置文件（`GUARD_CONFIG_FILE`）-> 环境变量（`GUARD_*`，
//! 以 `__` 分隔嵌套字段）。

use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// 配置文件路径所在的环境变量
pub const CONFIG_FILE_ENV: &str = "GUARD_CONFIG_FILE";
/// 环境变量前缀
pub const ENV_PREFIX: &str = "GUARD_";
/// 冷却时长上限：一天
pub const MAX_COOLDOWN_MS: u64 = 86_400_000;

/// 全局配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// 限流配置
    pub rate_limit: RateLimitConfig,
    /// 内容校验配置
    pub validation: ValidationConfig,
    /// 清理任务配置
    pub sweep: SweepConfig,
}

/// 限流配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_messages_per_minute: u32,
    pub max_messages_per_hour: u32,
    pub max_messages_per_day: u32,
    /// 单条消息允许的最大字符数
    pub max_message_length: usize,
    /// 超过该长度的消息发送后进入冷却
    pub long_message_threshold: usize,
    /// 冷却时长（毫秒）
    pub cooldown_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages_per_minute: 10,
            max_messages_per_hour: 100,
            max_messages_per_day: 500,
            max_message_length: 2000,
            long_message_threshold: 1000,
            cooldown_ms: 5000,
        }
    }
}

impl RateLimitConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        i64::try_from(self.cooldown_ms)
            .ok()
            .and_then(chrono::TimeDelta::try_milliseconds)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

/// 内容校验配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub max_links: usize,
    pub max_emojis: usize,
    pub max_mentions: usize,
    /// 同一个词允许出现的最多次数
    pub max_repeated_word: usize,
    /// 垃圾分达到该值时拒绝消息
    pub spam_threshold: u32,
    pub allowed_tags: Vec<String>,
    pub profanity: Vec<String>,
    pub suspicious_domains: Vec<String>,
    pub filter_profanity: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_length: 2000,
            max_links: 3,
            max_emojis: 10,
            max_mentions: 5,
            max_repeated_word: 4,
            spam_threshold: 3,
            allowed_tags: ["b", "i", "u", "em", "strong"]
                .into_iter()
                .map(String::from)
                .collect(),
            profanity: ["fuck", "shit", "bitch", "asshole", "bastard", "dickhead"]
                .into_iter()
                .map(String::from)
                .collect(),
            suspicious_domains: ["bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly"]
                .into_iter()
                .map(String::from)
                .collect(),
            filter_profanity: true,
        }
    }
}

/// 过期记录清理配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    /// 时间戳保留时长，不得短于一天（否则日配额失真）
    pub retention_hours: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            retention_hours: 24,
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::TimeDelta::try_hours)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl GuardConfig {
    /// 按默认顺序加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::from(Serialized::defaults(GuardConfig::default()));
        if let Ok(path) = env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed(ENV_PREFIX).ignore(&["config_file"]).split("__"));
        Self::from_figment(fig)
    }

    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: GuardConfig = fig.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if rl.max_messages_per_minute == 0
            || rl.max_messages_per_hour == 0
            || rl.max_messages_per_day == 0
        {
            return Err(ConfigError::InvalidRateLimit(
                "message limits must be greater than 0".to_string(),
            ));
        }
        if rl.max_messages_per_minute > rl.max_messages_per_hour
            || rl.max_messages_per_hour > rl.max_messages_per_day
        {
            return Err(ConfigError::InvalidRateLimit(
                "limits must not shrink as the window grows (minute <= hour <= day)".to_string(),
            ));
        }
        if rl.cooldown_ms > MAX_COOLDOWN_MS {
            return Err(ConfigError::InvalidRateLimit(format!(
                "cooldown_ms must not exceed {MAX_COOLDOWN_MS}"
            )));
        }
        if rl.max_message_length == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "max_message_length must be greater than 0".to_string(),
            ));
        }

        let v = &self.validation;
        if v.max_length == 0 {
            return Err(ConfigError::InvalidValidation(
                "max_length must be greater than 0".to_string(),
            ));
        }
        if v.min_length > v.max_length {
            return Err(ConfigError::InvalidValidation(format!(
                "min_length {} exceeds max_length {}",
                v.min_length, v.max_length
            )));
        }
        if v.spam_threshold == 0 {
            return Err(ConfigError::InvalidValidation(
                "spam_threshold must be greater than 0".to_string(),
            ));
        }
        if v.allowed_tags.iter().chain(&v.profanity).any(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidValidation(
                "tag and word lists must not contain blank entries".to_string(),
            ));
        }

        if self.sweep.interval_secs == 0 {
            return Err(ConfigError::InvalidSweep(
                "interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.sweep.retention_hours < 24 {
            return Err(ConfigError::InvalidSweep(
                "retention_hours must cover the daily window (>= 24)".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),
    #[error("Invalid validation configuration: {0}")]
    InvalidValidation(String),
    #[error("Invalid sweep configuration: {0}")]
    InvalidSweep(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.max_messages_per_minute, 10);
        assert_eq!(config.validation.max_length, 2000);
        assert_eq!(config.validation.allowed_tags, vec!["b", "i", "u", "em", "strong"]);
    }

    #[test]
    fn test_env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("GUARD_RATE_LIMIT__MAX_MESSAGES_PER_MINUTE", "20");
            jail.set_env("GUARD_VALIDATION__MAX_LINKS", "1");
            let config = GuardConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.rate_limit.max_messages_per_minute, 20);
            assert_eq!(config.validation.max_links, 1);
            // 未覆盖的字段保持默认值
            assert_eq!(config.rate_limit.max_messages_per_hour, 100);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "guard.yaml",
                r#"
rate_limit:
  max_messages_per_minute: 3
  cooldown_ms: 100
validation:
  allowed_tags: [b, code]
"#,
            )?;
            jail.set_env(CONFIG_FILE_ENV, "guard.yaml");
            jail.set_env("GUARD_RATE_LIMIT__COOLDOWN_MS", "250");

            let config = GuardConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.rate_limit.max_messages_per_minute, 3);
            assert_eq!(config.rate_limit.cooldown_ms, 250);
            assert_eq!(config.validation.allowed_tags, vec!["b", "code"]);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "guard.toml",
                r#"
[sweep]
interval_secs = 30
"#,
            )?;
            jail.set_env(CONFIG_FILE_ENV, "guard.toml");
            let config = GuardConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.sweep.interval(), Duration::from_secs(30));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_limits_fail_validation() {
        let mut config = GuardConfig::default();
        config.rate_limit.max_messages_per_minute = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.rate_limit.max_messages_per_minute = 200;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("minute <= hour <= day"));

        let mut config = GuardConfig::default();
        config.validation.min_length = 3000;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.sweep.retention_hours = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_with_bad_value_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("GUARD_RATE_LIMIT__MAX_MESSAGES_PER_DAY", "lots");
            assert!(matches!(GuardConfig::load(), Err(ConfigError::Load(_))));
            Ok(())
        });
    }
}
