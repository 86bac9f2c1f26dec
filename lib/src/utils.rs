use crate::{TranslateResult, TranslateStreamChunk, TranslateTask, Translator};
use anyhow::{anyhow, Result};
use handlebars::{no_escape, Handlebars};
use serde::Serialize;
use tokio::sync::mpsc;
#[cfg(test)]
use serde_json::json;

/// 渲染提示词模板；提示词不是 HTML，关闭转义
pub fn format_messages<T: Serialize>(template: &str, data: &T) -> Result<String> {
    let mut reg = Handlebars::new();
    reg.register_escape_fn(no_escape);
    reg.render_template(template, data)
        .map_err(|e| anyhow!(e))
}

/// 通过流式接口翻译，返回最后一次推送的完整译文
pub async fn stream2normal(
    translator: &impl Translator,
    task: TranslateTask
) -> Result<TranslateResult> {
    let (tx, mut rx) = mpsc::channel(64);

    let collect = async move {
        let mut result = TranslateResult::default();

        while let Some(chunk) = rx.recv().await {
            match chunk {
                TranslateStreamChunk::Partial(text) => result.content = Some(text),
                TranslateStreamChunk::End { finish_reason } => result.finish_reason = finish_reason,
                TranslateStreamChunk::Start => {}
            }
        }

        result
    };

    // 接收端必须同时运行，否则通道写满后发送端会卡住
    let (sent, mut result) = tokio::join!(translator.translate_stream(task, tx), collect);
    sent?;

    if result.content.is_none() {
        result.content = Some(String::new());
    }

    Ok(result)
}

#[test]
fn test_format_messages() -> Result<()> {
    let template = r#"Translate to "{{ target }}"{{#if source }} from "{{ source }}"{{/if}}: {{ content }}"#;

    let formatted = format_messages(template, &json!({
        "target": "de",
        "source": null,
        "content": "<b>Tom & \"Jerry\"</b>",
    }))?;

    assert_eq!(formatted, r#"Translate to "de": <b>Tom & "Jerry"</b>"#);

    Ok(())
}

#[test]
fn test_format_messages_does_not_expand_values() -> Result<()> {
    let formatted = format_messages("{{ content }}", &json!({ "content": "{{ target }}" }))?;

    assert_eq!(formatted, "{{ target }}");

    Ok(())
}
