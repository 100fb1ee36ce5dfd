//! 消息内容校验
//!
//! 对单条消息依次执行长度、脏词、垃圾内容、链接、HTML 标签、表情和 @提及检查，
//! 汇总错误与警告。各项检查相互独立，结果不产生副作用。

use config::ValidationConfig;
use domain::{RoomId, UserId, ValidationMetadata, ValidationResult};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};

const REPEATED_CHAR_RUN: usize = 5;
const MIN_COUNTED_WORD: usize = 3;

static SHOUTING: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{10,}").expect("valid regex"));
static PROMO_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)buy now|click here|free money|limited time offer|act now")
        .expect("valid regex")
});
static MONEY_BAIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[0-9]").expect("valid regex"));
static PUNCTUATION_FLOOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[!?]{4,}").expect("valid regex"));
static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{Alphabetic}\p{N}]+").expect("valid regex"));
static LINK_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:https?://|www\.)").expect("valid regex"));
/// `<name ...>` 或 `</name>`；属性部分不能跨过另一个尖括号
static HTML_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9]*)\b[^<>]*>").expect("valid regex")
});
static MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@[A-Za-z0-9_]").expect("valid regex"));

pub struct MessageValidator {
    config: RwLock<ValidationConfig>,
    clock: Arc<dyn Clock>,
}

impl MessageValidator {
    pub fn new(config: ValidationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: RwLock::new(config),
            clock,
        }
    }

    pub fn config(&self) -> ValidationConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_config(&self, config: ValidationConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// 校验一条消息
    pub fn validate_message(
        &self,
        content: &str,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> ValidationResult {
        let config = self.config();
        let mut report = Report::new(ValidationMetadata::new(
            user_id.clone(),
            room_id.clone(),
            self.clock.now(),
        ));
        report.metadata.length = content.chars().count();

        if content.trim().is_empty() {
            report.error("Message cannot be empty");
            return report.finish(None);
        }

        check_length(&config, &mut report);
        report.metadata.word_count = content.split_whitespace().count();

        let mut sanitized = content.to_owned();
        let mut changed = false;

        // 脏词
        let (masked, hits) = mask_profanity(content, &config.profanity);
        report.metadata.profanity_hits = hits;
        if hits > 0 {
            report.warning("Message contains inappropriate language");
            if config.filter_profanity {
                sanitized = masked;
                changed = true;
            }
        }

        // 垃圾内容
        let spam_score = spam_score(content, config.max_repeated_word);
        report.metadata.spam_score = spam_score;
        if spam_score >= config.spam_threshold {
            report.error("Message appears to be spam");
        } else if spam_score > 0 {
            report.warning("Message may contain spam patterns");
        }

        // 链接
        let links = extract_links(content);
        report.metadata.link_count = links.len();
        if links.len() > config.max_links {
            report.error(format!("Too many links (max {})", config.max_links));
        }
        if links
            .iter()
            .any(|link| is_suspicious_link(link, &config.suspicious_domains))
        {
            report.warning("Message contains suspicious links");
        }

        // HTML 标签：只报告第一个不允许的标签
        let tags = tag_names(content);
        for name in &tags {
            if !report.metadata.html_tags.contains(name) {
                report.metadata.html_tags.push(name.clone());
            }
        }
        if let Some(name) = tags.iter().find(|name| !is_allowed_tag(name, &config)) {
            report.error(format!("HTML tag <{name}> is not allowed"));
            sanitized = strip_disallowed_tags(&sanitized, &config);
            changed = true;
        }

        report.metadata.emoji_count = content.chars().filter(|c| is_emoji(*c)).count();
        if report.metadata.emoji_count > config.max_emojis {
            report.warning(format!("Too many emojis (max {})", config.max_emojis));
        }

        report.metadata.mention_count = count_mentions(content);
        if report.metadata.mention_count > config.max_mentions {
            report.error(format!("Too many mentions (max {})", config.max_mentions));
        }

        report.finish(changed.then_some(sanitized))
    }
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default(), Arc::new(SystemClock))
    }
}

struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
    metadata: ValidationMetadata,
}

impl Report {
    fn new(metadata: ValidationMetadata) -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata,
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn finish(self, sanitized_content: Option<String>) -> ValidationResult {
        let is_valid = self.errors.is_empty();
        if is_valid {
            debug!(
                user_id = %self.metadata.user_id,
                room_id = %self.metadata.room_id,
                warnings = self.warnings.len(),
                "消息校验通过"
            );
        } else {
            warn!(
                user_id = %self.metadata.user_id,
                room_id = %self.metadata.room_id,
                errors = ?self.errors,
                "消息校验未通过"
            );
        }
        ValidationResult {
            is_valid,
            errors: self.errors,
            warnings: self.warnings,
            sanitized_content,
            metadata: self.metadata,
        }
    }
}

fn check_length(config: &ValidationConfig, report: &mut Report) {
    let length = report.metadata.length;
    if length < config.min_length {
        report.error(format!(
            "Message too short (min {} characters)",
            config.min_length
        ));
    }
    if length > config.max_length {
        report.error(format!(
            "Message too long (max {} characters)",
            config.max_length
        ));
    }
}

/// 大小写不敏感地匹配脏词，命中的字符替换为 `*`
///
/// 返回处理后的文本和命中次数。
fn mask_profanity(content: &str, words: &[String]) -> (String, usize) {
    let chars: Vec<char> = content.chars().collect();
    let mut masked = vec![false; chars.len()];
    let mut hits = 0;

    for word in words {
        let needle: Vec<char> = word.trim().to_lowercase().chars().collect();
        if needle.is_empty() || needle.len() > chars.len() {
            continue;
        }
        let mut i = 0;
        while i + needle.len() <= chars.len() {
            let matched = needle
                .iter()
                .zip(&chars[i..])
                .all(|(n, c)| c.to_lowercase().eq(n.to_lowercase()));
            if matched {
                masked[i..i + needle.len()].fill(true);
                hits += 1;
                i += needle.len();
            } else {
                i += 1;
            }
        }
    }

    let text = chars
        .iter()
        .zip(&masked)
        .map(|(c, m)| if *m { '*' } else { *c })
        .collect();
    (text, hits)
}

/// 五种固定模式各计 1 分，重复词再计 1 分
fn spam_score(content: &str, max_repeated_word: usize) -> u32 {
    let patterns = [
        has_repeated_char_run(content),
        SHOUTING.is_match(content),
        PROMO_PHRASE.is_match(content),
        MONEY_BAIT.is_match(content),
        PUNCTUATION_FLOOD.is_match(content),
    ];
    let mut score = patterns.iter().filter(|hit| **hit).count() as u32;
    if has_repeated_words(&content.to_lowercase(), max_repeated_word) {
        score += 1;
    }
    score
}

/// regex 不支持反向引用，连续相同字符只能逐字统计
fn has_repeated_char_run(content: &str) -> bool {
    let mut prev = None;
    let mut run = 0;
    for c in content.chars() {
        if c.is_whitespace() {
            prev = None;
            run = 0;
            continue;
        }
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= REPEATED_CHAR_RUN {
            return true;
        }
    }
    false
}

fn has_repeated_words(lower: &str, max_repeated_word: usize) -> bool {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in WORD
        .find_iter(lower)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() >= MIN_COUNTED_WORD)
    {
        let count = counts.entry(word).or_insert(0);
        *count += 1;
        if *count > max_repeated_word {
            return true;
        }
    }
    false
}

fn extract_links(content: &str) -> Vec<&str> {
    content
        .split_whitespace()
        .filter(|word| LINK_PREFIX.is_match(word))
        .collect()
}

/// 按主机名匹配可疑域名（完全相同或为其子域名）
fn is_suspicious_link(link: &str, domains: &[String]) -> bool {
    let host = link_host(link);
    domains.iter().any(|domain| {
        let domain = domain.trim().to_ascii_lowercase();
        !domain.is_empty()
            && (host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|rest| rest.ends_with('.')))
    })
}

fn link_host(link: &str) -> String {
    let lower = link.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(lower.as_str());
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    host.split(':').next().unwrap_or_default().to_owned()
}

/// 按出现顺序返回标签名（小写）
fn tag_names(content: &str) -> Vec<String> {
    HTML_TAG
        .captures_iter(content)
        .map(|caps| caps[2].to_ascii_lowercase())
        .collect()
}

fn is_allowed_tag(name: &str, config: &ValidationConfig) -> bool {
    config
        .allowed_tags
        .iter()
        .any(|allowed| allowed.trim().eq_ignore_ascii_case(name))
}

/// 移除所有不允许的标签，保留标签内文本和允许的标签
///
/// 移除后可能拼出新的标签（如 `<scr<b>ipt>`），因此重复处理直到没有不允许的标签。
fn strip_disallowed_tags(content: &str, config: &ValidationConfig) -> String {
    let mut text = content.to_owned();
    loop {
        let mut stripped = false;
        let next = HTML_TAG.replace_all(&text, |caps: &Captures| {
            if is_allowed_tag(&caps[2], config) {
                caps[0].to_owned()
            } else {
                stripped = true;
                String::new()
            }
        });
        let next = next.into_owned();
        if !stripped {
            return next;
        }
        text = next;
    }
}

fn is_emoji(c: char) -> bool {
    matches!(
        u32::from(c),
        0x1F1E6..=0x1F1FF
            | 0x1F300..=0x1F5FF
            | 0x1F600..=0x1F64F
            | 0x1F680..=0x1F6FF
            | 0x1F900..=0x1F9FF
            | 0x1FA70..=0x1FAFF
            | 0x2600..=0x26FF
            | 0x2700..=0x27BF
    )
}

fn count_mentions(content: &str) -> usize {
    MENTION.find_iter(content).count()
}
