use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, LitStr, Token, Type};
use syn::parse::{Parse, ParseStream};

struct BuildFfiInput {
    pub name: String,
    pub translator: Type,
}

impl Parse for BuildFfiInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name = input.parse::<LitStr>()?;

        input.parse::<Token![,]>()?;

        let typ = input.parse::<Type>()?;

        Ok(BuildFfiInput {
            name: name.value(),
            translator: typ,
        })
    }
}

/// 为翻译插件生成 C ABI 导出函数
///
/// ```ignore
/// build_ffi!("gemini", GeminiTranslator);
/// ```
#[proc_macro]
pub fn build_ffi(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as BuildFfiInput);

    let name = input.name;
    let translator = input.translator;

    TokenStream::from(quote!{
use lib::ffi::{block_on, into_c_string, read_c_str, text_result, translator_ref, FfiResult, FfiResultExt, StreamCallback, TranslateStreamChunkFFI, TranslatorHandle};
use lib::{TranslateStreamChunk, TranslateTask, Translator};
use std::ffi::{c_char, c_void};
use tokio::sync::mpsc::channel;

fn parse_task(json_str: *const c_char) -> anyhow::Result<TranslateTask> {
    let input = unsafe { read_c_str(json_str)? };
    serde_json::from_str(input).map_err(|e| anyhow::anyhow!("JSON parse error: {}", e))
}

#[no_mangle]
pub extern "C" fn get_plugin_name() -> *mut c_char {
    into_c_string(#name.to_string())
}

#[no_mangle]
pub extern "C" fn create_translator(
    json_str: *const c_char
) -> *mut FfiResult<TranslatorHandle> {
    let result = (|| -> anyhow::Result<*mut TranslatorHandle> {
        let input = unsafe { read_c_str(json_str)? };
        let value: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| anyhow::anyhow!("JSON parse error: {}", e))?;

        let translator = block_on(<#translator as Translator>::new(value))?
            .map_err(|e| anyhow::anyhow!("Creation error: {:#}", e))?;

        Ok(Box::into_raw(Box::new(translator)) as *mut TranslatorHandle)
    })();

    let result = match result {
        Ok(handle) => FfiResult { ptr: handle, err: std::ptr::null_mut() },
        Err(e) => FfiResult { ptr: std::ptr::null_mut(), err: into_c_string(format!("{:#}", e)) },
    };

    Box::into_raw(Box::new(result))
}

#[no_mangle]
pub extern "C" fn free_translator(translator_ptr: *mut TranslatorHandle) {
    if !translator_ptr.is_null() {
        unsafe {
            drop(Box::from_raw(translator_ptr as *mut #translator));
        }
    }
}

#[no_mangle]
pub extern "C" fn call_translate(
    translator_ptr: *mut TranslatorHandle,
    json_str: *const c_char
) -> *mut FfiResult<c_char> {
    let result = (|| -> anyhow::Result<String> {
        let task = parse_task(json_str)?;
        let translator = unsafe { translator_ref::<#translator>(translator_ptr)? };

        let result = block_on(translator.translate(task))??;

        Ok(result.content.unwrap_or_default())
    })();

    text_result(result)
}

#[no_mangle]
pub extern "C" fn call_translate_stream(
    translator_ptr: *mut TranslatorHandle,
    json_str: *const c_char,
    callback_wrapper: StreamCallback,
    callback: *mut c_void
) -> *mut FfiResult<i8> {
    let result = (|| -> anyhow::Result<i8> {
        let task = parse_task(json_str)?;
        let translator = unsafe { translator_ref::<#translator>(translator_ptr)? };

        let (tx, mut rx) = channel::<TranslateStreamChunk>(256);

        let cb = callback as usize;

        block_on(async move {
            let forward = tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    callback_wrapper(chunk.into_ffi(), cb as *mut c_void);
                }
            });

            let result = translator.translate_stream(task, tx).await;

            // 出错前已推送的内容也要交给宿主
            let _ = forward.await;

            result.map(|_| 0i8)
        })?
    })();

    result.to_ptr()
}

#[no_mangle]
pub extern "C" fn free_string(s: *mut c_char) {
    lib::ffi::free_string(s)
}

#[no_mangle]
pub extern "C" fn free_text_result(result: *mut FfiResult<c_char>) {
    lib::ffi::free_text_result(result)
}

#[no_mangle]
pub extern "C" fn free_status_result(result: *mut FfiResult<i8>) {
    lib::ffi::free_status_result(result)
}

#[no_mangle]
pub extern "C" fn free_stream_chunk(chunk: *mut TranslateStreamChunkFFI) {
    lib::ffi::free_stream_chunk(chunk)
}

    })
}
