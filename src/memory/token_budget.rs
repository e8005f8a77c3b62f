//! Token 预算估算
//!
//! 简单的字符计数近似，用于 Scratchpad 的 budgeted view 与 Answer 阶段的 Handle 回填。

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 将文本截断到指定 token 数，保留开头部分
    pub fn truncate(text: &str, max_tokens: usize) -> String {
        let estimated = Self::estimate(text);
        if estimated <= max_tokens {
            return text.to_string();
        }

        let ratio = max_tokens as f64 / estimated as f64;
        // 留 10% 余量
        let target_chars = (text.chars().count() as f64 * ratio * 0.9) as usize;
        let truncated: String = text.chars().take(target_chars).collect();

        format!("{}...\n[truncated due to token budget]", truncated.trim_end())
    }
}
