pub mod config;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod request;
pub mod stream;
pub mod translator;

#[cfg(test)]
mod mock;

use crate::config::GeminiConfig;
use crate::translator::GeminiTranslator;
use lib::http::HttpTransport;
use lib::utils::stream2normal;
use lib::{TranslateStreamChunk, TranslateTask, Translator};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

#[cfg(feature = "dylib")]
pub mod ffi {
    use crate::translator::GeminiTranslator;
    use macros::build_ffi;

    build_ffi!("gemini", GeminiTranslator);
}

/// 宿主调用时附带的参数
pub struct TranslateOptions {
    /// 插件配置
    pub config: Value,
    /// 宿主检测到的源语言
    pub detected_language: Option<String>,
    /// 流式模式下接收译文的通道
    pub sender: Option<Sender<TranslateStreamChunk>>,
    pub transport: Arc<dyn HttpTransport>,
}

/// 按配置选择流式或非流式翻译。
///
/// 非流式返回译文；流式且提供了 `sender` 时译文全部通过通道推送，返回 `None`。
/// 失败时返回可直接展示给用户的错误信息。
pub async fn translate(
    text: &str,
    from: &str,
    to: &str,
    options: TranslateOptions,
) -> Result<Option<String>, String> {
    dispatch(text, from, to, options)
        .await
        .map_err(|e| format!("{:#}", e))
}

async fn dispatch(
    text: &str,
    from: &str,
    to: &str,
    options: TranslateOptions,
) -> anyhow::Result<Option<String>> {
    let task = TranslateTask {
        id: String::new(),
        content: text.to_string(),
        source_language: from.to_string(),
        target_language: to.to_string(),
        detected_language: options.detected_language,
        system_prompt: None,
    };

    if task.is_blank() {
        return Ok(Some(String::new()));
    }

    let translator = GeminiTranslator::with_transport(
        GeminiConfig::from_value(options.config)?,
        options.transport,
    );

    match (translator.config.enable_streaming, options.sender) {
        (true, Some(sender)) => {
            translator.translate_stream(task, sender).await?;
            Ok(None)
        }
        (true, None) => Ok(stream2normal(&translator, task).await?.content),
        (false, _) => Ok(translator.translate(task).await?.content),
    }
}

#[cfg(test)]
use crate::mock::{text_frame, MockTransport};
#[cfg(test)]
use serde_json::json;

#[cfg(test)]
fn options(config: Value, transport: Arc<MockTransport>, sender: Option<Sender<TranslateStreamChunk>>) -> TranslateOptions {
    TranslateOptions {
        config,
        detected_language: Some("fr".to_string()),
        sender,
        transport,
    }
}

#[tokio::test]
async fn test_translate_buffered_returns_text() {
    let transport = MockTransport::json(200, &json!({ "candidates": [{ "content": { "parts": [{ "text": "\"Hallo\"" }] } }] }));
    let config = json!({ "apiKey": "k", "modelName": "m", "enableStreaming": "false" });

    let result = translate("Hello", "auto", "de", options(config, transport.clone(), None)).await;

    assert_eq!(result, Ok(Some("Hallo".to_string())));

    let request = transport.last_request().expect("request sent");
    assert!(request.url.contains(":generateContent?"));
    assert!(request.body.contains(r#"from the detected language \"fr\""#));
}

#[tokio::test]
async fn test_translate_streaming_uses_sender() {
    let frames = [text_frame("Hal"), text_frame("lo")];
    let transport = MockTransport::new(200, &[frames[0].as_str(), frames[1].as_str()]);
    let config = json!({ "apiKey": "k", "modelName": "m", "enableStreaming": "true" });
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    let result = translate("Hello", "en", "de", options(config, transport, Some(tx))).await;
    assert_eq!(result, Ok(None));

    let mut last = None;
    while let Some(chunk) = rx.recv().await {
        if let TranslateStreamChunk::Partial(text) = chunk {
            last = Some(text);
        }
    }
    assert_eq!(last.as_deref(), Some("Hallo"));
}

#[tokio::test]
async fn test_translate_streaming_without_sender_returns_final_text() {
    let frames = [text_frame("Hal"), text_frame("lo")];
    let transport = MockTransport::new(200, &[frames[0].as_str(), frames[1].as_str()]);
    let config = json!({ "apiKey": "k", "modelName": "m", "enableStreaming": "true" });

    let result = translate("Hello", "en", "de", options(config, transport.clone(), None)).await;

    assert_eq!(result, Ok(Some("Hallo".to_string())));
    assert!(transport.last_request().expect("request sent").url.ends_with("&alt=sse"));
}

#[tokio::test]
async fn test_translate_blank_text_ignores_config() {
    let transport = MockTransport::new(200, &[]);

    let result = translate("   ", "auto", "de", options(json!({}), transport.clone(), None)).await;

    assert_eq!(result, Ok(Some(String::new())));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_translate_errors_are_strings() {
    let transport = MockTransport::new(200, &[]);

    let missing_key = translate("Hello", "en", "de", options(json!({ "modelName": "m" }), transport.clone(), None)).await;
    assert_eq!(missing_key, Err("请在插件配置中设置 Gemini API Key。".to_string()));

    let missing_model = translate("Hello", "en", "de", options(json!({ "apiKey": "k" }), transport.clone(), None)).await;
    assert_eq!(missing_model, Err("请在插件配置中设置 Gemini 模型名称。".to_string()));

    assert_eq!(transport.calls(), 0);
}
