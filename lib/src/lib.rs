pub mod utils;
pub mod ffi;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::Sender;

/// 自动检测源语言时使用的语言代码
pub const AUTO_LANGUAGE: &str = "auto";

fn auto_language() -> String {
    AUTO_LANGUAGE.to_string()
}

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct TranslateTask {
    /// ID
    #[builder(default)]
    #[serde(default)]
    pub id: String,
    /// 原文
    pub content: String,
    /// 源语言代码，原样传给模型，`auto` 表示自动检测
    #[builder(default = "auto_language()")]
    #[serde(default = "auto_language")]
    pub source_language: String,
    /// 目标语言代码
    pub target_language: String,
    /// 宿主检测到的源语言
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub detected_language: Option<String>,
    /// 系统提示词，优先于插件配置
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl TranslateTask {
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResult {
    pub content: Option<String>,
    /// 非正常结束时模型给出的原因
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TranslateStreamChunk {
    Start,
    /// 截至目前的完整译文
    Partial(String),
    End { finish_reason: Option<String> },
}

#[async_trait]
pub trait Translator {
    type This;

    /// 创建翻译实例
    async fn new(config: Value) -> Result<Self::This>;

    /// 翻译
    async fn translate(&self, task: TranslateTask) -> Result<TranslateResult>;

    /// 流式翻译
    async fn translate_stream(
        &self,
        task: TranslateTask,
        sender: Sender<TranslateStreamChunk>,
    ) -> Result<()>;
}

#[test]
fn test_task_builder_defaults() -> Result<()> {
    let task = TranslateTaskBuilder::default()
        .content("Hello")
        .target_language("de")
        .build()?;

    assert_eq!(task.source_language, AUTO_LANGUAGE);
    assert_eq!(task.detected_language, None);
    assert_eq!(task.id, "");

    Ok(())
}

#[test]
fn test_task_deserialize_defaults() -> Result<()> {
    let task: TranslateTask = serde_json::from_str(r#"{"content":"  ","target_language":"fr"}"#)?;

    assert_eq!(task.source_language, AUTO_LANGUAGE);
    assert!(task.is_blank());

    Ok(())
}
