use anyhow::Result;
use lib::utils::format_messages;
use lib::AUTO_LANGUAGE;
use serde::Serialize;

/// 系统提示词与翻译指令之间的分隔
pub const SECTION_DELIMITER: &str = "\n\n---\n\n";

const TRANSLATION_TEMPLATE: &str = r#"Translate the following text{{#if source_language}} from language code "{{source_language}}"{{else}}{{#if detected_language}} from the detected language "{{detected_language}}"{{/if}}{{/if}} to language code "{{target_language}}".
Output ONLY the translated text. Do not add explanations, notes, surrounding quotes or code fences.

{{content}}"#;

#[derive(Serialize)]
struct PromptContext<'a> {
    content: &'a str,
    source_language: Option<&'a str>,
    detected_language: Option<&'a str>,
    target_language: &'a str,
}

fn explicit_language(code: Option<&str>) -> Option<&str> {
    code.filter(|c| !c.is_empty() && *c != AUTO_LANGUAGE)
}

/// 拼出发给模型的完整提示词，语言代码原样使用
pub fn build_prompt(
    content: &str,
    source_language: &str,
    target_language: &str,
    detected_language: Option<&str>,
    system_prompt: Option<&str>,
) -> Result<String> {
    let source_language = explicit_language(Some(source_language));

    let context = PromptContext {
        content,
        source_language,
        detected_language: match source_language {
            Some(_) => None,
            None => explicit_language(detected_language),
        },
        target_language,
    };

    let instruction = format_messages(TRANSLATION_TEMPLATE, &context)?;

    Ok(match system_prompt.map(str::trim).filter(|s| !s.is_empty()) {
        Some(system_prompt) => format!("{}{}{}", system_prompt, SECTION_DELIMITER, instruction),
        None => instruction,
    })
}

#[test]
fn test_detected_language_used_for_auto_source() -> Result<()> {
    let prompt = build_prompt("Hallo Welt", "auto", "de", Some("fr"), None)?;

    assert!(prompt.contains(r#"from the detected language "fr""#));
    assert!(prompt.contains(r#"to language code "de""#));
    assert!(!prompt.contains("from language code"));
    assert!(!prompt.contains("auto"));

    Ok(())
}

#[test]
fn test_explicit_source_wins_over_detected() -> Result<()> {
    let prompt = build_prompt("Hello", "en", "de", Some("fr"), None)?;

    assert!(prompt.contains(r#"from language code "en""#));
    assert!(!prompt.contains("detected language"));

    Ok(())
}

#[test]
fn test_no_source_clause_when_nothing_known() -> Result<()> {
    let prompt = build_prompt("Hello", "auto", "zh-CN", Some("auto"), None)?;

    assert!(prompt.starts_with(r#"Translate the following text to language code "zh-CN"."#));
    assert!(prompt.contains("Output ONLY the translated text"));
    assert!(prompt.ends_with("\n\nHello"));

    Ok(())
}

#[test]
fn test_system_prompt_prepended_with_delimiter() -> Result<()> {
    let prompt = build_prompt("Hello", "en", "ja", None, Some("  You are a literary translator.  "))?;

    assert!(prompt.starts_with("You are a literary translator.\n\n---\n\nTranslate the following text"));

    let blank = build_prompt("Hello", "en", "ja", None, Some("   "))?;
    assert!(blank.starts_with("Translate the following text"));

    Ok(())
}

#[test]
fn test_content_is_not_escaped_or_expanded() -> Result<()> {
    let prompt = build_prompt(r#"<p>"Tom" & {{ Jerry }}</p>"#, "en", "de", None, None)?;

    assert!(prompt.ends_with(r#"<p>"Tom" & {{ Jerry }}</p>"#));

    Ok(())
}
