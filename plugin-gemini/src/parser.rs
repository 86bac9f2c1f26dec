//! generateContent 响应解析
//!
//! 模型不一定遵守“只输出译文”的要求，提取出的文本统一经过 [`clean_translation`]
//! 去掉外层代码块和引号。

use crate::error::GeminiError;
use serde_json::Value;

/// 正常结束时的 finishReason
pub const NORMAL_FINISH: &str = "STOP";

pub(crate) const FENCE: &str = "```";

/// 代码块语言标记允许的字符
pub(crate) fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamFragment {
    pub text: Option<String>,
    pub finish_reason: Option<String>,
    pub block_reason: Option<String>,
}

fn first_part_text(value: &Value) -> Option<&str> {
    value["candidates"][0]["content"]["parts"][0]["text"].as_str()
}

fn block_reason(feedback: &Value) -> String {
    match feedback["blockReason"].as_str() {
        Some(reason) => reason.to_string(),
        None => match feedback.get("safetyRatings") {
            Some(ratings) => ratings.to_string(),
            None => feedback.to_string(),
        },
    }
}

/// 解析非流式响应体
pub fn parse_buffered(body: &str) -> Result<String, GeminiError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| GeminiError::UnexpectedShape(body.to_string()))?;

    if let Some(text) = first_part_text(&value) {
        return Ok(clean_translation(text));
    }

    if let Some(feedback) = value.get("promptFeedback").filter(|f| !f.is_null()) {
        return Err(GeminiError::Blocked(block_reason(feedback)));
    }

    match value.get("candidates") {
        None | Some(Value::Null) => Err(GeminiError::NoCandidates),
        Some(Value::Array(candidates)) if candidates.is_empty() => Err(GeminiError::NoCandidates),
        Some(_) => Err(GeminiError::UnexpectedShape(value.to_string())),
    }
}

/// 解析事件流里的一帧
pub fn parse_fragment(value: &Value) -> StreamFragment {
    StreamFragment {
        text: first_part_text(value)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string),
        finish_reason: value["candidates"][0]["finishReason"]
            .as_str()
            .map(ToString::to_string),
        block_reason: value
            .get("promptFeedback")
            .filter(|f| f["blockReason"].is_string())
            .map(block_reason),
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let body = text.strip_prefix(FENCE)?.strip_suffix(FENCE)?;

    // 语言标记后面必须紧跟换行，否则当作正文
    let tag_len = body.find(|c: char| !is_tag_char(c)).unwrap_or(body.len());
    let after_tag = &body[tag_len..];
    let body = match after_tag.strip_prefix("\r\n").or_else(|| after_tag.strip_prefix('\n')) {
        Some(rest) => rest,
        None => body,
    };

    let body = body.strip_suffix('\n').unwrap_or(body);
    Some(body.strip_suffix('\r').unwrap_or(body))
}

fn strip_outer_quotes(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    if inner.contains('"') {
        return None;
    }
    Some(inner)
}

/// 去掉首尾空白，并逐层剥掉外层代码块和包住全文的双引号，直到没有可剥的一层；
/// 对已清理的文本不做任何改动
pub fn clean_translation(raw: &str) -> String {
    let mut text = raw.trim();

    while let Some(inner) = strip_code_fence(text).or_else(|| strip_outer_quotes(text)) {
        text = inner.trim();
    }

    text.to_string()
}

#[cfg(test)]
use serde_json::json;

#[test]
fn test_buffered_trims_text() -> anyhow::Result<()> {
    let body = json!({ "candidates": [{ "content": { "parts": [{ "text": "  Bonjour  " }] } }] });

    assert_eq!(parse_buffered(&body.to_string())?, "Bonjour");

    Ok(())
}

#[test]
fn test_buffered_block_reason() {
    let body = json!({ "promptFeedback": { "blockReason": "SAFETY", "safetyRatings": [] } });

    let err = parse_buffered(&body.to_string()).unwrap_err();

    assert_eq!(err, GeminiError::Blocked("SAFETY".to_string()));
    assert!(err.to_string().contains("SAFETY"));
}

#[test]
fn test_buffered_block_without_reason_uses_safety_ratings() {
    let body = json!({
        "candidates": [],
        "promptFeedback": { "safetyRatings": [{ "category": "HARM_CATEGORY_HARASSMENT", "probability": "HIGH" }] }
    });

    let err = parse_buffered(&body.to_string()).unwrap_err();

    assert!(err.to_string().contains("HARM_CATEGORY_HARASSMENT"));
}

#[test]
fn test_buffered_no_candidates() {
    assert_eq!(parse_buffered("{}").unwrap_err(), GeminiError::NoCandidates);
    assert_eq!(parse_buffered(r#"{"candidates":[]}"#).unwrap_err(), GeminiError::NoCandidates);
}

#[test]
fn test_buffered_unexpected_shape_keeps_payload() {
    let body = json!({ "candidates": [{ "finishReason": "RECITATION" }] });

    let err = parse_buffered(&body.to_string()).unwrap_err();

    assert!(matches!(err, GeminiError::UnexpectedShape(_)));
    assert!(err.to_string().contains("RECITATION"));

    assert!(matches!(parse_buffered("<html>").unwrap_err(), GeminiError::UnexpectedShape(_)));
}

#[test]
fn test_fragment_fields() {
    let fragment = parse_fragment(&json!({
        "candidates": [{ "content": { "parts": [{ "text": "Bon" }], "role": "model" }, "finishReason": "MAX_TOKENS" }]
    }));

    assert_eq!(fragment.text.as_deref(), Some("Bon"));
    assert_eq!(fragment.finish_reason.as_deref(), Some("MAX_TOKENS"));
    assert_eq!(fragment.block_reason, None);

    let empty = parse_fragment(&json!({ "candidates": [{ "content": { "parts": [{ "text": "" }] } }] }));
    assert_eq!(empty, StreamFragment::default());

    let blocked = parse_fragment(&json!({ "promptFeedback": { "blockReason": "OTHER" } }));
    assert_eq!(blocked.block_reason.as_deref(), Some("OTHER"));
}

#[test]
fn test_cleanup_is_idempotent() {
    let once = clean_translation("\"hello\"");
    assert_eq!(once, "hello");
    assert_eq!(clean_translation(&once), once);

    let nested = clean_translation("\"\"hello\"\"");
    assert_eq!(clean_translation(&nested), nested);

    let fenced = clean_translation("```\n\"hi\"\n```");
    assert_eq!(fenced, "hi");
    assert_eq!(clean_translation(&fenced), fenced);

    for raw in [
        "\"```\nx\n```\"",
        "```\n```\nx\n```\n```",
        "\"\"x\"\"",
        "  ```text\n \" Hallo \" \n```  ",
    ] {
        let once = clean_translation(raw);
        assert_eq!(clean_translation(&once), once, "cleaning {:?} twice", raw);
    }

    assert_eq!(clean_translation("\"```\nx\n```\""), "x");
    assert_eq!(clean_translation("```\n```\nx\n```\n```"), "x");
    assert_eq!(clean_translation("  ```text\n \" Hallo \" \n```  "), "Hallo");
}

#[test]
fn test_cleanup_strips_fence_with_language_tag() {
    let raw = "```json\n{\"greeting\": \"hallo\"}\n  indented\n```";

    assert_eq!(clean_translation(raw), "{\"greeting\": \"hallo\"}\n  indented");
}

#[test]
fn test_cleanup_keeps_partial_markup() {
    assert_eq!(clean_translation("```rust\nfn main() {}"), "```rust\nfn main() {}");
    assert_eq!(clean_translation("\"a\" and \"b\""), "\"a\" and \"b\"");
    assert_eq!(clean_translation("```hello world```"), "hello world");
    assert_eq!(clean_translation("say \"hi\""), "say \"hi\"");
}
