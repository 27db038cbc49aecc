//! Content moderation rejection detection.
//!
//! Some backends report a moderation rejection as an ordinary job message
//! rather than a distinct status, and keep the job in a non-terminal state
//! afterwards. Detecting the message text is the only way to fail such tasks
//! promptly instead of polling them until the time budget runs out.

use std::sync::LazyLock;

use regex::Regex;

/// Message fragments that indicate a content moderation rejection.
///
/// The upstream service reports these in Chinese; the English patterns cover
/// backends that localize their errors.
const POLICY_PATTERNS: &[&str] = &[
    "内容相似性校验未通过",
    "审核未通过",
    "涉嫌违规",
    "敏感内容",
    r"(?i)content\s+policy",
    r"(?i)policy\s+violation",
    r"(?i)sensitive\s+content",
];

/// Compiled rejection patterns. Compiled once, reused forever.
static POLICY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    POLICY_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
});

/// Returns true when `message` carries a content moderation rejection.
pub fn is_policy_rejection(message: &str) -> bool {
    if message.is_empty() {
        return false;
    }
    POLICY_RES.iter().any(|re| re.is_match(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        assert_eq!(POLICY_RES.len(), POLICY_PATTERNS.len());
    }

    #[test]
    fn detects_similarity_check_rejection() {
        assert!(is_policy_rejection("内容相似性校验未通过"));
        assert!(is_policy_rejection(
            "生成失败: 内容相似性校验未通过, 请修改后重试"
        ));
    }

    #[test]
    fn detects_other_chinese_rejections() {
        assert!(is_policy_rejection("审核未通过"));
        assert!(is_policy_rejection("您的内容涉嫌违规"));
        assert!(is_policy_rejection("检测到敏感内容"));
    }

    #[test]
    fn detects_english_rejections_case_insensitive() {
        assert!(is_policy_rejection("Content Policy violation detected"));
        assert!(is_policy_rejection("rejected: policy violation"));
        assert!(is_policy_rejection("Sensitive content found in prompt"));
    }

    #[test]
    fn ignores_ordinary_errors() {
        assert!(!is_policy_rejection(""));
        assert!(!is_policy_rejection("connection reset by peer"));
        assert!(!is_policy_rejection("internal server error"));
        assert!(!is_policy_rejection("生成超时"));
    }
}
