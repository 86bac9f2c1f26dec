use crate::error::GeminiError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 非流式请求的时限
pub const BUFFERED_TIMEOUT: Duration = Duration::from_secs(30);

/// 流式请求的时限，覆盖整个流
pub const STREAMING_TIMEOUT: Duration = Duration::from_secs(60);

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// 宿主配置里的开关是字符串，只有 "true" 算开启
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s == "true",
        _ => false,
    })
}

/// `null` 与缺省一样当作空字符串
fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_api_base<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|base| !base.trim().is_empty())
        .unwrap_or_else(default_api_base))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    #[serde(default, deserialize_with = "deserialize_text")]
    pub api_key: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub model_name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub enable_streaming: bool,
    #[serde(default = "default_api_base", deserialize_with = "deserialize_api_base")]
    pub api_base: String,
    /// generationConfig.thinkingConfig.thinkingBudget，不配置则不发送
    #[serde(default)]
    pub thinking_budget: Option<i64>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: String::new(),
            model_name: String::new(),
            system_prompt: None,
            enable_streaming: false,
            api_base: default_api_base(),
            thinking_budget: None,
        }
    }
}

impl GeminiConfig {
    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        serde_json::from_value(value).map_err(|e| anyhow::anyhow!("插件配置格式错误: {}", e))
    }

    pub fn validate(&self) -> Result<(), GeminiError> {
        if self.api_key.trim().is_empty() {
            return Err(GeminiError::MissingApiKey);
        }
        if self.model_name.trim().is_empty() {
            return Err(GeminiError::MissingModelName);
        }
        Ok(())
    }
}

#[cfg(test)]
use anyhow::Result;
#[cfg(test)]
use serde_json::json;

#[test]
fn test_enable_streaming_accepts_string_and_bool() -> Result<()> {
    let on = GeminiConfig::from_value(json!({ "enableStreaming": "true" }))?;
    let off = GeminiConfig::from_value(json!({ "enableStreaming": "yes" }))?;
    let bool_on = GeminiConfig::from_value(json!({ "enableStreaming": true }))?;
    let missing = GeminiConfig::from_value(json!({}))?;

    assert!(on.enable_streaming);
    assert!(!off.enable_streaming);
    assert!(bool_on.enable_streaming);
    assert!(!missing.enable_streaming);
    assert_eq!(missing.api_base, DEFAULT_API_BASE);

    Ok(())
}

#[test]
fn test_validate_reports_first_missing_setting() -> Result<()> {
    let config = GeminiConfig::from_value(json!({ "apiKey": "", "modelName": "" }))?;
    assert_eq!(config.validate(), Err(GeminiError::MissingApiKey));

    let config = GeminiConfig::from_value(json!({ "apiKey": "k", "modelName": "  " }))?;
    assert_eq!(config.validate(), Err(GeminiError::MissingModelName));

    let config = GeminiConfig::from_value(json!({
        "apiKey": "k",
        "modelName": "gemini-2.0-flash",
        "systemPrompt": "Be formal.",
        "thinkingBudget": 1,
    }))?;
    assert_eq!(config.validate(), Ok(()));
    assert_eq!(config.thinking_budget, Some(1));

    Ok(())
}

#[test]
fn test_null_settings_count_as_missing() -> Result<()> {
    let config = GeminiConfig::from_value(json!({
        "apiKey": null,
        "modelName": null,
        "systemPrompt": null,
        "enableStreaming": null,
        "apiBase": null,
        "thinkingBudget": null,
    }))?;

    assert_eq!(config.validate(), Err(GeminiError::MissingApiKey));
    assert_eq!(config.model_name, "");
    assert!(!config.enable_streaming);
    assert_eq!(config.api_base, DEFAULT_API_BASE);

    let config = GeminiConfig::from_value(json!({ "apiKey": "k", "modelName": null, "apiBase": "" }))?;
    assert_eq!(config.validate(), Err(GeminiError::MissingModelName));
    assert_eq!(config.api_base, DEFAULT_API_BASE);

    Ok(())
}
