use crate::TranslateStreamChunk;
use anyhow::{anyhow, bail, Result};
use std::ffi::{c_char, c_void, CStr, CString};
use std::future::Future;
use std::ptr;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};

pub type StreamCallback = extern "C" fn(chunk: *mut TranslateStreamChunkFFI, user_data: *mut c_void);

#[repr(C)]
pub struct TranslatorHandle {
    _private: [u8; 0],
}

#[repr(C)]
pub struct FfiResult<T> {
    pub ptr: *mut T,
    pub err: *mut c_char,
}

pub trait FfiResultExt<T> {
    fn to_ptr(self) -> *mut T;
}

impl<T> FfiResultExt<FfiResult<T>> for Result<T> {
    fn to_ptr(self) -> *mut FfiResult<T> {
        Box::into_raw(Box::new(self.into()))
    }
}

impl<T> From<Result<T>> for FfiResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => FfiResult {
                ptr: Box::into_raw(Box::new(value)),
                err: ptr::null_mut(),
            },
            Err(err) => FfiResult {
                ptr: ptr::null_mut(),
                err: into_c_string(format!("{:#}", err)),
            },
        }
    }
}

/// 文本结果直接交出 C 字符串，不再额外装箱
pub fn text_result(result: Result<String>) -> *mut FfiResult<c_char> {
    let result = match result {
        Ok(text) => FfiResult {
            ptr: into_c_string(text),
            err: ptr::null_mut(),
        },
        Err(err) => FfiResult {
            ptr: ptr::null_mut(),
            err: into_c_string(format!("{:#}", err)),
        },
    };

    Box::into_raw(Box::new(result))
}

pub fn into_c_string(s: String) -> *mut c_char {
    let s = if s.contains('\0') { s.replace('\0', "") } else { s };
    CString::new(s).unwrap_or_default().into_raw()
}

/// # Safety
/// `ptr` 为空或指向以 NUL 结尾、在返回值使用期间有效的字符串
pub unsafe fn read_c_str<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        bail!("Null pointer received");
    }

    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

/// # Safety
/// `handle` 为空或由同一插件以 `T` 创建且尚未释放
pub unsafe fn translator_ref<'a, T>(handle: *mut TranslatorHandle) -> Result<&'a T> {
    if handle.is_null() {
        bail!("Null pointer received");
    }

    Ok(&*(handle as *const T))
}

/// 在同步的 C 调用里驱动异步翻译
pub fn block_on<F>(future: F) -> Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(tokio::task::block_in_place(|| handle.block_on(future)))
        }
        // 单线程运行时不允许就地阻塞，换一个线程驱动
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| block_on_fresh(future))
                .join()
                .map_err(|_| anyhow!("translation thread panicked"))?
        }),
        Err(_) => block_on_fresh(future),
    }
}

fn block_on_fresh<F: Future>(future: F) -> Result<F::Output> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateStreamChunkTag {
    Start,
    Partial,
    End,
}

/// `Partial` 时 `text` 为完整译文，`End` 时为非正常结束原因（可能为空）
#[repr(C)]
pub struct TranslateStreamChunkFFI {
    pub tag: TranslateStreamChunkTag,
    pub text: *mut c_char,
}

impl TranslateStreamChunk {
    pub fn into_ffi(self) -> *mut TranslateStreamChunkFFI {
        let chunk = match self {
            TranslateStreamChunk::Start => TranslateStreamChunkFFI {
                tag: TranslateStreamChunkTag::Start,
                text: ptr::null_mut(),
            },
            TranslateStreamChunk::Partial(text) => TranslateStreamChunkFFI {
                tag: TranslateStreamChunkTag::Partial,
                text: into_c_string(text),
            },
            TranslateStreamChunk::End { finish_reason } => TranslateStreamChunkFFI {
                tag: TranslateStreamChunkTag::End,
                text: finish_reason.map(into_c_string).unwrap_or(ptr::null_mut()),
            },
        };

        Box::into_raw(Box::new(chunk))
    }

    pub fn from_ffi(chunk: *mut TranslateStreamChunkFFI) -> Result<TranslateStreamChunk> {
        if chunk.is_null() {
            bail!("null pointer received from ffi");
        }

        let chunk = unsafe { Box::from_raw(chunk) };
        let text = if chunk.text.is_null() {
            None
        } else {
            Some(unsafe { CString::from_raw(chunk.text) }.into_string()?)
        };

        Ok(match chunk.tag {
            TranslateStreamChunkTag::Start => TranslateStreamChunk::Start,
            TranslateStreamChunkTag::Partial => TranslateStreamChunk::Partial(text.unwrap_or_default()),
            TranslateStreamChunkTag::End => TranslateStreamChunk::End { finish_reason: text },
        })
    }
}

pub fn free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(s));
    }
}

pub fn free_text_result(result: *mut FfiResult<c_char>) {
    if result.is_null() {
        return;
    }
    let result = unsafe { Box::from_raw(result) };
    free_string(result.ptr);
    free_string(result.err);
}

pub fn free_status_result(result: *mut FfiResult<i8>) {
    if result.is_null() {
        return;
    }
    let result = unsafe { Box::from_raw(result) };
    if !result.ptr.is_null() {
        unsafe {
            drop(Box::from_raw(result.ptr));
        }
    }
    free_string(result.err);
}

pub fn free_stream_chunk(chunk: *mut TranslateStreamChunkFFI) {
    if chunk.is_null() {
        return;
    }
    let chunk = unsafe { Box::from_raw(chunk) };
    free_string(chunk.text);
}

/// 读取并释放 C 侧拿到的结果
pub fn take_text_result(result: *mut FfiResult<c_char>) -> Result<String> {
    if result.is_null() {
        bail!("result is null");
    }

    let result = unsafe { Box::from_raw(result) };

    if !result.err.is_null() {
        let msg = unsafe { CString::from_raw(result.err) }.to_string_lossy().into_owned();
        free_string(result.ptr);
        bail!(msg);
    }

    if result.ptr.is_null() {
        bail!("result obj is null");
    }

    Ok(unsafe { CString::from_raw(result.ptr) }.into_string()?)
}

#[test]
fn test_stream_chunk_ffi_keeps_text() -> Result<()> {
    let chunk = TranslateStreamChunk::Partial("Bonjour".to_string());
    assert_eq!(TranslateStreamChunk::from_ffi(chunk.into_ffi())?, TranslateStreamChunk::Partial("Bonjour".to_string()));

    let end = TranslateStreamChunk::End { finish_reason: Some("SAFETY".to_string()) };
    assert_eq!(TranslateStreamChunk::from_ffi(end.clone().into_ffi())?, end);

    Ok(())
}

#[test]
fn test_text_result_carries_error_message() -> Result<()> {
    let ok = take_text_result(text_result(Ok("Hallo".to_string())))?;
    assert_eq!(ok, "Hallo");

    let err = take_text_result(text_result(Err(anyhow!("请在插件配置中设置 Gemini API Key。"))));
    assert_eq!(err.unwrap_err().to_string(), "请在插件配置中设置 Gemini API Key。");

    Ok(())
}

#[test]
fn test_into_c_string_drops_nul() -> Result<()> {
    let ptr = into_c_string("a\0b".to_string());
    let s = unsafe { CString::from_raw(ptr) }.into_string()?;
    assert_eq!(s, "ab");

    Ok(())
}

#[test]
fn test_block_on_without_runtime() -> Result<()> {
    assert_eq!(block_on(async { 1 + 1 })?, 2);

    Ok(())
}

#[tokio::test]
async fn test_block_on_inside_current_thread_runtime() -> Result<()> {
    let value = block_on(async {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        "done"
    })?;
    assert_eq!(value, "done");

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_block_on_inside_multi_thread_runtime() -> Result<()> {
    assert_eq!(block_on(async { "done" })?, "done");

    Ok(())
}
