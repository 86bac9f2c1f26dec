//! 通过 C ABI 调用插件，HTTP 由 mockito 模拟

use anyhow::{bail, Result};
use lib::ffi::{take_text_result, TranslateStreamChunkFFI, TranslatorHandle};
use lib::TranslateStreamChunk;
use mockito::{Matcher, Server};
use plugin_gemini::ffi::{
    call_translate, call_translate_stream, create_translator, free_status_result, free_string,
    free_translator, get_plugin_name,
};
use serde_json::{json, Value};
use std::ffi::{c_void, CStr, CString};

fn create(config: Value) -> Result<*mut TranslatorHandle> {
    let config = CString::new(config.to_string())?;
    let result = unsafe { Box::from_raw(create_translator(config.as_ptr())) };

    if !result.err.is_null() {
        let msg = unsafe { CString::from_raw(result.err) }.to_string_lossy().into_owned();
        bail!(msg);
    }

    Ok(result.ptr)
}

fn config(api_base: &str, streaming: bool) -> Value {
    json!({
        "apiKey": "test-key",
        "modelName": "gemini-test",
        "enableStreaming": if streaming { "true" } else { "false" },
        "apiBase": api_base,
    })
}

fn task(content: &str) -> Result<CString> {
    Ok(CString::new(json!({
        "id": "ffi-1",
        "content": content,
        "source_language": "en",
        "target_language": "fr",
    }).to_string())?)
}

extern "C" fn collect(chunk: *mut TranslateStreamChunkFFI, user_data: *mut c_void) {
    let sink = unsafe { &mut *(user_data as *mut Vec<TranslateStreamChunk>) };
    if let Ok(chunk) = TranslateStreamChunk::from_ffi(chunk) {
        sink.push(chunk);
    }
}

#[test]
fn test_plugin_name() {
    let name = get_plugin_name();
    assert_eq!(unsafe { CStr::from_ptr(name) }.to_str(), Ok("gemini"));
    free_string(name);
}

#[test]
fn test_call_translate() -> Result<()> {
    let mut server = Server::new();

    let mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "candidates": [{ "content": { "parts": [{ "text": "```\nBonjour\n```" }] } }] }).to_string())
        .create();

    let handle = create(config(&server.url(), false))?;
    let task = task("Hello")?;

    let text = take_text_result(call_translate(handle, task.as_ptr()));
    free_translator(handle);

    assert_eq!(text?, "Bonjour");
    mock.assert();

    Ok(())
}

#[test]
fn test_call_translate_reports_api_error() -> Result<()> {
    let mut server = Server::new();

    let _mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#)
        .create();

    let handle = create(config(&server.url(), false))?;
    let task = task("Hello")?;

    let err = take_text_result(call_translate(handle, task.as_ptr())).unwrap_err().to_string();
    free_translator(handle);

    assert!(err.contains("400"));
    assert!(err.contains("请检查 API Key"));

    Ok(())
}

#[test]
fn test_call_translate_without_api_key() -> Result<()> {
    let handle = create(json!({ "modelName": "gemini-test", "apiBase": "http://127.0.0.1:9" }))?;
    let task = task("Hello")?;

    let err = take_text_result(call_translate(handle, task.as_ptr())).unwrap_err().to_string();
    free_translator(handle);

    assert_eq!(err, "请在插件配置中设置 Gemini API Key。");

    Ok(())
}

#[test]
fn test_call_translate_stream() -> Result<()> {
    let mut server = Server::new();

    let frame = |text: &str| {
        format!(
            "data: {}\r\n\r\n",
            json!({ "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }] })
        )
    };
    let body = format!("{}data: oops\r\n\r\n{}", frame("Bon"), frame("jour"));

    let mock = server
        .mock("POST", "/models/gemini-test:streamGenerateContent")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("key".into(), "test-key".into()),
            Matcher::UrlEncoded("alt".into(), "sse".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create();

    let handle = create(config(&server.url(), true))?;
    let task = task("Hello")?;

    let mut chunks: Vec<TranslateStreamChunk> = vec![];
    let status = call_translate_stream(
        handle,
        task.as_ptr(),
        collect,
        &mut chunks as *mut Vec<TranslateStreamChunk> as *mut c_void,
    );
    let ok = unsafe { (*status).err.is_null() };
    free_status_result(status);
    free_translator(handle);

    assert!(ok);
    assert_eq!(
        chunks,
        vec![
            TranslateStreamChunk::Start,
            TranslateStreamChunk::Partial("Bon".to_string()),
            TranslateStreamChunk::Partial("Bonjour".to_string()),
            TranslateStreamChunk::End { finish_reason: None },
        ]
    );
    mock.assert();

    Ok(())
}
