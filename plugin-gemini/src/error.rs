//! Gemini 插件的错误
//!
//! 错误最终以字符串交给宿主直接展示，所以每个变体的 `Display` 就是给用户看的提示。

use lib::http::TransportError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeminiError {
    #[error("请在插件配置中设置 Gemini API Key。")]
    MissingApiKey,
    #[error("请在插件配置中设置 Gemini 模型名称。")]
    MissingModelName,
    #[error("{0}")]
    Http(String),
    #[error("Gemini API 请求被阻止: {0}")]
    Blocked(String),
    #[error("Gemini API 未返回有效的翻译结果。")]
    NoCandidates,
    #[error("Gemini API 响应结构异常: {0}")]
    UnexpectedShape(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 把非 2xx 响应整理成带提示的错误信息；`body` 为 `None` 表示响应体读取失败
pub fn classify_http_error(status: u16, body: Option<&str>, model_name: &str) -> String {
    let mut message = format!("Gemini API 请求失败。\nHTTP 状态码: {}", status);

    let Some(body) = body else {
        message.push_str("\n无法解析错误响应。");
        return message;
    };

    let detail = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(value) => match value["error"]["message"].as_str().filter(|m| !m.is_empty()) {
            Some(msg) => msg.to_string(),
            None => value.to_string(),
        },
        Err(_) => body.to_string(),
    };

    message.push_str(&format!("\n错误信息: {}", detail));

    if detail.contains("API key not valid") {
        message.push_str("\n(请检查 API Key)");
    } else if detail.contains("models/") && detail.contains("found") {
        message.push_str(&format!("\n(请检查模型 \"{}\")", model_name));
    }

    message
}

#[test]
fn test_invalid_api_key_hint() {
    let msg = classify_http_error(400, Some(r#"{"error":{"message":"API key not valid. Please pass a valid API key."}}"#), "gemini-2.0-flash");

    assert!(msg.contains("400"));
    assert!(msg.contains("API key not valid"));
    assert!(msg.contains("请检查 API Key"));
}

#[test]
fn test_model_not_found_hint_names_model() {
    let msg = classify_http_error(
        404,
        Some(r#"{"error":{"code":404,"message":"models/gemini-9 is not found for API version v1beta","status":"NOT_FOUND"}}"#),
        "gemini-9",
    );

    assert!(msg.contains("404"));
    assert!(msg.contains("请检查模型 \"gemini-9\""));
}

#[test]
fn test_detail_falls_back_to_raw_body() {
    let plain = classify_http_error(502, Some("Bad Gateway"), "m");
    assert!(plain.contains("错误信息: Bad Gateway"));

    let json_string = classify_http_error(500, Some(r#""boom""#), "m");
    assert!(json_string.contains("错误信息: boom"));

    let other = classify_http_error(500, Some(r#"{"status":"INTERNAL"}"#), "m");
    assert!(other.contains(r#"错误信息: {"status":"INTERNAL"}"#));
    assert!(!other.contains("请检查"));
}

#[test]
fn test_unreadable_body() {
    let msg = classify_http_error(503, None, "m");

    assert!(msg.contains("503"));
    assert!(msg.contains("无法解析错误响应"));
}

#[test]
fn test_empty_error_message_falls_back_to_body() {
    let msg = classify_http_error(500, Some(r#"{"error":{"code":500,"message":""}}"#), "m");

    assert!(msg.contains(r#"错误信息: {"error":{"code":500,"message":""}}"#));
}
