use crate::config::{GeminiConfig, BUFFERED_TIMEOUT, STREAMING_TIMEOUT};
use crate::error::{classify_http_error, GeminiError};
use crate::parser::{parse_buffered, parse_fragment, NORMAL_FINISH};
use crate::prompt::build_prompt;
use crate::request::{generate_content_url, stream_generate_content_url, GenerateContentRequest};
use crate::stream::StreamAccumulator;
use anyhow::Result;
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use lib::http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
use lib::{TranslateResult, TranslateStreamChunk, TranslateTask, Translator};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

pub struct GeminiTranslator {
    pub config: GeminiConfig,
    transport: Arc<dyn HttpTransport>,
}

impl GeminiTranslator {
    pub fn with_transport(config: GeminiConfig, transport: Arc<dyn HttpTransport>) -> Self {
        GeminiTranslator { config, transport }
    }

    /// 空文本返回 `None`，无需请求
    fn prepare(&self, task: &TranslateTask) -> Result<Option<String>> {
        if task.is_blank() {
            return Ok(None);
        }

        self.config.validate()?;

        let system_prompt = task
            .system_prompt
            .as_deref()
            .or(self.config.system_prompt.as_deref());

        let prompt = build_prompt(
            &task.content,
            &task.source_language,
            &task.target_language,
            task.detected_language.as_deref(),
            system_prompt,
        )?;

        Ok(Some(prompt))
    }

    async fn post(&self, url: String, prompt: String, timeout: Duration) -> Result<HttpResponse> {
        let body = serde_json::to_string(&GenerateContentRequest::new(prompt, &self.config))?;

        let response = self
            .transport
            .send(HttpRequest::post_json(url, body, timeout))
            .await
            .map_err(GeminiError::from)?;

        if response.is_success() {
            return Ok(response);
        }

        let status = response.status;
        let body = response.text().await.ok();
        let message = classify_http_error(status, body.as_deref(), &self.config.model_name);

        tracing::error!("[GEMINI] 请求失败: model={} status={}", self.config.model_name, status);

        Err(GeminiError::Http(message).into())
    }

    /// 非流式请求，返回清理后的完整译文
    async fn generate(&self, prompt: String) -> Result<String> {
        let response = self
            .post(generate_content_url(&self.config), prompt, BUFFERED_TIMEOUT)
            .await?;

        let body = response.text().await.map_err(GeminiError::from)?;

        Ok(parse_buffered(&body)?)
    }

    /// 流式请求，每当译文变化就推送一次完整译文；返回非正常结束原因
    async fn generate_stream(
        &self,
        prompt: String,
        sender: &Sender<TranslateStreamChunk>,
    ) -> Result<Option<String>> {
        let response = self
            .post(stream_generate_content_url(&self.config), prompt, STREAMING_TIMEOUT)
            .await?;

        let mut events = response.body.eventsource();
        let mut acc = StreamAccumulator::default();

        while let Some(event) = events.next().await {
            let event = event.map_err(stream_error)?;
            Self::consume_event(&event.data, &mut acc, sender).await?;
        }

        if let Some(snapshot) = acc.finish() {
            sender.send(TranslateStreamChunk::Partial(snapshot)).await?;
        }

        if acc.delivered().is_none() {
            if let Some(reason) = acc.block_reason() {
                return Err(GeminiError::Blocked(reason.to_string()).into());
            }
        }

        Ok(acc.abnormal_finish().map(ToString::to_string))
    }

    async fn consume_event(
        data: &str,
        acc: &mut StreamAccumulator,
        sender: &Sender<TranslateStreamChunk>,
    ) -> Result<()> {
        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("[GEMINI_STREAM] 跳过无法解析的事件: {} ({})", data, e);
                return Ok(());
            }
        };

        let fragment = parse_fragment(&value);

        if let Some(reason) = fragment.finish_reason.as_deref().filter(|r| *r != NORMAL_FINISH) {
            tracing::warn!("[GEMINI_STREAM] 非正常结束: finishReason={}", reason);
        }

        if let Some(snapshot) = acc.apply(fragment) {
            sender.send(TranslateStreamChunk::Partial(snapshot)).await?;
        }

        Ok(())
    }
}

fn stream_error(err: EventStreamError<TransportError>) -> GeminiError {
    match err {
        EventStreamError::Transport(e) => GeminiError::Transport(e),
        other => GeminiError::Transport(TransportError::Network(other.to_string())),
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    type This = Self;

    async fn new(config: Value) -> Result<Self> {
        Ok(GeminiTranslator::with_transport(
            GeminiConfig::from_value(config)?,
            Arc::new(ReqwestTransport::new()),
        ))
    }

    async fn translate(&self, task: TranslateTask) -> Result<TranslateResult> {
        let Some(prompt) = self.prepare(&task)? else {
            return Ok(TranslateResult {
                content: Some(String::new()),
                finish_reason: None,
            });
        };

        tracing::info!("[GEMINI] 翻译: task={} model={} to={}", task.id, self.config.model_name, task.target_language);

        let content = self.generate(prompt).await?;

        Ok(TranslateResult {
            content: Some(content),
            finish_reason: None,
        })
    }

    async fn translate_stream(
        &self,
        task: TranslateTask,
        sender: Sender<TranslateStreamChunk>,
    ) -> Result<()> {
        let Some(prompt) = self.prepare(&task)? else {
            sender.send(TranslateStreamChunk::Start).await?;
            sender.send(TranslateStreamChunk::End { finish_reason: None }).await?;
            return Ok(());
        };

        tracing::info!("[GEMINI_STREAM] 流式翻译: task={} model={} to={}", task.id, self.config.model_name, task.target_language);

        sender.send(TranslateStreamChunk::Start).await?;

        let finish_reason = self.generate_stream(prompt, &sender).await?;

        sender.send(TranslateStreamChunk::End { finish_reason }).await?;

        Ok(())
    }
}

#[cfg(test)]
use crate::mock::{init_logging, sse_frame, text_frame, MockTransport};
#[cfg(test)]
use lib::TranslateTaskBuilder;
#[cfg(test)]
use serde_json::json;

#[cfg(test)]
fn test_translator(transport: Arc<MockTransport>) -> GeminiTranslator {
    let config = GeminiConfig {
        api_key: "test-key".to_string(),
        model_name: "gemini-2.0-flash".to_string(),
        ..GeminiConfig::default()
    };

    GeminiTranslator::with_transport(config, transport)
}

#[cfg(test)]
fn test_task(content: &str) -> Result<TranslateTask> {
    Ok(TranslateTaskBuilder::default()
        .id("t-1")
        .content(content)
        .source_language("en")
        .target_language("fr")
        .build()?)
}

#[cfg(test)]
async fn collect_stream(
    translator: &GeminiTranslator,
    task: TranslateTask,
) -> (Result<()>, Vec<TranslateStreamChunk>) {
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);

    let result = translator.translate_stream(task, tx).await;

    let mut chunks = vec![];
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }

    (result, chunks)
}

#[tokio::test]
async fn test_translate_buffered() -> Result<()> {
    let transport = MockTransport::json(200, &json!({
        "candidates": [{ "content": { "parts": [{ "text": "  Bonjour  " }] }, "finishReason": "STOP" }]
    }));
    let translator = test_translator(transport.clone());

    let result = translator.translate(test_task("Hello")?).await?;

    assert_eq!(result.content.as_deref(), Some("Bonjour"));

    let request = transport.last_request().expect("request sent");
    assert_eq!(
        request.url,
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=test-key"
    );
    assert_eq!(request.timeout, BUFFERED_TIMEOUT);

    let body: Value = serde_json::from_str(&request.body)?;
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
    assert!(prompt.contains(r#"from language code "en""#));
    assert!(prompt.ends_with("Hello"));

    Ok(())
}

#[tokio::test]
async fn test_blank_input_never_hits_network() -> Result<()> {
    let transport = MockTransport::new(500, &[]);
    let translator = GeminiTranslator::with_transport(GeminiConfig::default(), transport.clone());

    let result = translator.translate(test_task("  \n\t ")?).await?;
    assert_eq!(result.content.as_deref(), Some(""));

    let (result, chunks) = collect_stream(&translator, test_task("")?).await;
    result?;
    assert_eq!(chunks, vec![TranslateStreamChunk::Start, TranslateStreamChunk::End { finish_reason: None }]);

    assert_eq!(transport.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_missing_settings_fail_before_request() -> Result<()> {
    let transport = MockTransport::new(200, &[]);

    let translator = GeminiTranslator::with_transport(
        GeminiConfig { model_name: "gemini-2.0-flash".to_string(), ..GeminiConfig::default() },
        transport.clone(),
    );
    let err = translator.translate(test_task("Hello")?).await.unwrap_err();
    assert_eq!(err.downcast_ref::<GeminiError>(), Some(&GeminiError::MissingApiKey));

    let translator = GeminiTranslator::with_transport(
        GeminiConfig { api_key: "k".to_string(), ..GeminiConfig::default() },
        transport.clone(),
    );
    let (result, _) = collect_stream(&translator, test_task("Hello")?).await;
    assert_eq!(result.unwrap_err().downcast_ref::<GeminiError>(), Some(&GeminiError::MissingModelName));

    assert_eq!(transport.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_http_error_is_classified() -> Result<()> {
    let transport = MockTransport::json(400, &json!({ "error": { "code": 400, "message": "API key not valid. Please pass a valid API key." } }));
    let translator = test_translator(transport);

    let err = translator.translate(test_task("Hello")?).await.unwrap_err().to_string();

    assert!(err.contains("400"));
    assert!(err.contains("请检查 API Key"));

    Ok(())
}

#[tokio::test]
async fn test_timeout_surfaces_as_error() -> Result<()> {
    let translator = test_translator(MockTransport::unreachable(TransportError::Timeout(BUFFERED_TIMEOUT)));

    let err = translator.translate(test_task("Hello")?).await.unwrap_err();

    assert!(err.to_string().contains("30"));

    Ok(())
}

#[tokio::test]
async fn test_task_system_prompt_overrides_config() -> Result<()> {
    let transport = MockTransport::json(200, &json!({ "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }] }));
    let mut translator = test_translator(transport.clone());
    translator.config.system_prompt = Some("from config".to_string());

    let mut task = test_task("Hello")?;
    task.system_prompt = Some("from task".to_string());
    translator.translate(task).await?;

    let body: Value = serde_json::from_str(&transport.last_request().expect("request sent").body)?;
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
    assert!(prompt.starts_with("from task\n\n---\n\n"));

    Ok(())
}

#[tokio::test]
async fn test_stream_delivers_growing_snapshots() -> Result<()> {
    init_logging();

    let frames = [
        text_frame("Bon"),
        text_frame(""),
        text_frame("jour"),
        sse_frame(&json!({ "candidates": [{ "finishReason": "STOP" }] })),
    ];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    let transport = MockTransport::new(200, &frames);
    let translator = test_translator(transport.clone());

    let (result, chunks) = collect_stream(&translator, test_task("Hello")?).await;
    result?;

    assert_eq!(
        chunks,
        vec![
            TranslateStreamChunk::Start,
            TranslateStreamChunk::Partial("Bon".to_string()),
            TranslateStreamChunk::Partial("Bonjour".to_string()),
            TranslateStreamChunk::End { finish_reason: None },
        ]
    );

    let request = transport.last_request().expect("request sent");
    assert!(request.url.ends_with(":streamGenerateContent?key=test-key&alt=sse"));
    assert_eq!(request.timeout, STREAMING_TIMEOUT);

    Ok(())
}

#[tokio::test]
async fn test_stream_skips_malformed_lines() -> Result<()> {
    init_logging();

    let body = format!(
        "{}data: {{not json\r\n\r\n: keep-alive\r\n{}",
        text_frame("Hal"),
        text_frame("lo"),
    );
    // 网络分块与行边界无关
    let (head, tail) = body.split_at(body.len() / 2 + 3);
    let translator = test_translator(MockTransport::new(200, &[head, tail]));

    let (result, chunks) = collect_stream(&translator, test_task("Hello")?).await;
    result?;

    assert_eq!(chunks.last(), Some(&TranslateStreamChunk::End { finish_reason: None }));
    assert!(chunks.contains(&TranslateStreamChunk::Partial("Hallo".to_string())));

    Ok(())
}

#[tokio::test]
async fn test_stream_fenced_answer_only_grows() -> Result<()> {
    let frames = [text_frame("```text\n"), text_frame("Bon"), text_frame("jour\n```")];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    let translator = test_translator(MockTransport::new(200, &frames));

    let (result, chunks) = collect_stream(&translator, test_task("Hello")?).await;
    result?;

    assert_eq!(
        chunks,
        vec![
            TranslateStreamChunk::Start,
            TranslateStreamChunk::Partial("Bon".to_string()),
            TranslateStreamChunk::Partial("Bonjour".to_string()),
            TranslateStreamChunk::End { finish_reason: None },
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_stream_multibyte_text_split_across_chunks() -> Result<()> {
    let body = format!("{}{}", text_frame("你好"), text_frame("，世界"));
    let split = body.find('你').unwrap_or_default() + 1;
    let (head, tail) = body.as_bytes().split_at(split);
    let translator = test_translator(MockTransport::bytes(200, &[head, tail]));

    let (result, chunks) = collect_stream(&translator, test_task("Hello, world")?).await;
    result?;

    assert_eq!(
        chunks,
        vec![
            TranslateStreamChunk::Start,
            TranslateStreamChunk::Partial("你好".to_string()),
            TranslateStreamChunk::Partial("你好，世界".to_string()),
            TranslateStreamChunk::End { finish_reason: None },
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_stream_reports_abnormal_finish() -> Result<()> {
    let frames = [
        sse_frame(&json!({ "candidates": [{ "content": { "parts": [{ "text": "Guten" }] }, "finishReason": "MAX_TOKENS" }] })),
    ];
    let translator = test_translator(MockTransport::new(200, &[frames[0].as_str()]));

    let (result, chunks) = collect_stream(&translator, test_task("Good morning")?).await;
    result?;

    assert_eq!(
        chunks,
        vec![
            TranslateStreamChunk::Start,
            TranslateStreamChunk::Partial("Guten".to_string()),
            TranslateStreamChunk::End { finish_reason: Some("MAX_TOKENS".to_string()) },
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_stream_error_after_partial_content() -> Result<()> {
    let first = text_frame("Bon");
    let translator = test_translator(MockTransport::broken_after(
        &[first.as_str()],
        TransportError::Network("connection reset".to_string()),
    ));

    let (result, chunks) = collect_stream(&translator, test_task("Hello")?).await;

    assert!(result.unwrap_err().to_string().contains("connection reset"));
    assert_eq!(
        chunks,
        vec![TranslateStreamChunk::Start, TranslateStreamChunk::Partial("Bon".to_string())]
    );

    Ok(())
}

#[tokio::test]
async fn test_stream_blocked_prompt() -> Result<()> {
    let frame = sse_frame(&json!({ "promptFeedback": { "blockReason": "SAFETY" } }));
    let translator = test_translator(MockTransport::new(200, &[frame.as_str()]));

    let (result, _) = collect_stream(&translator, test_task("Hello")?).await;

    let err = result.unwrap_err();
    assert_eq!(err.downcast_ref::<GeminiError>(), Some(&GeminiError::Blocked("SAFETY".to_string())));

    Ok(())
}

#[tokio::test]
async fn test_stream_http_error() -> Result<()> {
    let translator = test_translator(MockTransport::new(404, &[r#"{"error":{"message":"models/gemini-2.0-flash is not found"}}"#]));

    let (result, chunks) = collect_stream(&translator, test_task("Hello")?).await;

    let err = result.unwrap_err().to_string();
    assert!(err.contains("404"));
    assert!(err.contains("请检查模型 \"gemini-2.0-flash\""));
    assert_eq!(chunks, vec![TranslateStreamChunk::Start]);

    Ok(())
}
