//! 软失败标记
//!
//! 失败不会抛给下游，而是以固定前缀的字符串写进结果里。
//! 这些前缀被后续阶段识别，必须保持原样。

/// 转换失败的前缀（也是缓存中“已知转换失败”的标志）
pub const CONVERSION_FAILURE_PREFIX: &str = "Error converting";

/// 报告转换失败时写入答案的标记
pub const CONVERSION_ERROR: &str = "CONVERSION_ERROR";

/// 回答或评判失败时的标记
pub const EVALUATION_ERROR: &str = "EVALUATION_ERROR";

/// 构造转换失败的标记文本
pub fn conversion_failure(file: &str, detail: &str) -> String {
    format!("{} {} to markdown: {}", CONVERSION_FAILURE_PREFIX, file, detail)
}

/// 构造回答/评判失败的标记文本
pub fn evaluation_failure(detail: &str) -> String {
    format!("{}: {}", EVALUATION_ERROR, detail)
}

/// 是否为转换失败的结果
pub fn is_conversion_failure(text: &str) -> bool {
    text.starts_with(CONVERSION_FAILURE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_failure_format() {
        let text = conversion_failure("deck.pptx", "timeout");
        assert_eq!(text, "Error converting deck.pptx to markdown: timeout");
        assert!(is_conversion_failure(&text));
    }

    #[test]
    fn test_conversion_failure_requires_exact_prefix() {
        assert!(is_conversion_failure("Error converting: timeout"));
        assert!(!is_conversion_failure(" Error converting"));
        assert!(!is_conversion_failure("# Quarterly report"));
        assert_eq!(evaluation_failure("bad json"), "EVALUATION_ERROR: bad json");
    }
}
