use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

const MAX_ID_LEN: usize = 128;

fn parse_identifier(field: &str, value: String) -> DomainResult<String> {
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(DomainError::invalid_argument(field, "cannot be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(DomainError::invalid_argument(field, "too long"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(DomainError::invalid_argument(field, "must not contain whitespace"));
    }
    Ok(value)
}

/// 用户唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn parse(value: impl Into<String>) -> DomainResult<Self> {
        parse_identifier("user_id", value.into()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 聊天室唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(value: impl Into<String>) -> DomainResult<Self> {
        parse_identifier("room_id", value.into()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_trimmed() {
        let id = UserId::parse("  u1 ").unwrap();
        assert_eq!(id.as_str(), "u1");
    }

    #[test]
    fn empty_and_spaced_ids_are_rejected() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert!(RoomId::parse("room 1").is_err());
        assert!(RoomId::parse("x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = RoomId::parse("r1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"r1\"");
    }
}
