//! 提示词模板
//!
//! 模板使用 `{name}` 占位符，`{{` 和 `}}` 表示字面量花括号。
//! 替换只做一遍，插入的内容中即使含有 `{question}` 之类的文本也不会被再次替换。

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{|\}\}|\{(\w+)\}").expect("占位符正则有效"))
}

/// 渲染模板，未知占位符原样保留
pub fn render_prompt(template: &str, vars: &[(&str, &str)]) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures<'_>| match caps.get(1) {
            Some(name) => vars
                .iter()
                .find(|(key, _)| *key == name.as_str())
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string()),
            None => caps[0][..1].to_string(),
        })
        .into_owned()
}
