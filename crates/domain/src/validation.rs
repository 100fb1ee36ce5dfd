//! 消息校验结果

use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, Timestamp, UserId};

/// 单次校验附带的统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub user_id: UserId,
    pub room_id: RoomId,
    /// 字符数（按 Unicode 标量计）
    pub length: usize,
    pub word_count: usize,
    pub link_count: usize,
    pub emoji_count: usize,
    pub mention_count: usize,
    pub spam_score: u32,
    pub profanity_hits: usize,
    /// 出现过的 HTML 标签名（小写，去重，按出现顺序）
    pub html_tags: Vec<String>,
    pub validated_at: Timestamp,
}

impl ValidationMetadata {
    pub fn new(user_id: UserId, room_id: RoomId, validated_at: Timestamp) -> Self {
        Self {
            user_id,
            room_id,
            length: 0,
            word_count: 0,
            link_count: 0,
            emoji_count: 0,
            mention_count: 0,
            spam_score: 0,
            profanity_hits: 0,
            html_tags: Vec::new(),
            validated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// 屏蔽脏词或剥离标签后的内容；未改动时为 `None`
    pub sanitized_content: Option<String>,
    pub metadata: ValidationMetadata,
}

impl ValidationResult {
    pub fn has_error(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.contains(needle))
    }

    pub fn has_warning(&self, needle: &str) -> bool {
        self.warnings.iter().any(|w| w.contains(needle))
    }

    /// 应当被投递的文本
    pub fn effective_content<'a>(&'a self, original: &'a str) -> &'a str {
        self.sanitized_content.as_deref().unwrap_or(original)
    }
}
