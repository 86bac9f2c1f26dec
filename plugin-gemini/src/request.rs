use crate::config::GeminiConfig;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
pub struct RequestContent {
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
pub struct RequestPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: i64,
}

impl GenerateContentRequest {
    pub fn new(prompt: String, config: &GeminiConfig) -> Self {
        GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: config.thinking_budget.map(|thinking_budget| GenerationConfig {
                thinking_config: ThinkingConfig { thinking_budget },
            }),
        }
    }
}

fn model_url(config: &GeminiConfig, method: &str) -> String {
    format!(
        "{}/models/{}:{}",
        config.api_base.trim_end_matches('/'),
        config.model_name.trim(),
        method
    )
}

pub fn generate_content_url(config: &GeminiConfig) -> String {
    format!("{}?key={}", model_url(config, "generateContent"), config.api_key.trim())
}

pub fn stream_generate_content_url(config: &GeminiConfig) -> String {
    format!(
        "{}?key={}&alt=sse",
        model_url(config, "streamGenerateContent"),
        config.api_key.trim()
    )
}

#[cfg(test)]
fn test_config() -> GeminiConfig {
    GeminiConfig {
        api_key: "secret".to_string(),
        model_name: "gemini-2.0-flash".to_string(),
        ..GeminiConfig::default()
    }
}

#[test]
fn test_endpoints() {
    let config = test_config();

    assert_eq!(
        generate_content_url(&config),
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=secret"
    );
    assert_eq!(
        stream_generate_content_url(&config),
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?key=secret&alt=sse"
    );
}

#[test]
fn test_request_body_shape() -> anyhow::Result<()> {
    let mut config = test_config();

    let body = serde_json::to_value(GenerateContentRequest::new("hi".to_string(), &config))?;
    assert_eq!(body, serde_json::json!({ "contents": [{ "parts": [{ "text": "hi" }] }] }));

    config.thinking_budget = Some(1);
    let body = serde_json::to_value(GenerateContentRequest::new("hi".to_string(), &config))?;
    assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 1);

    Ok(())
}
