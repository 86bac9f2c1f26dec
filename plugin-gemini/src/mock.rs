use async_trait::async_trait;
use futures_util::stream;
use lib::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// 内存中的传输实现，记录收到的请求并回放预设的响应
pub struct MockTransport {
    status: u16,
    chunks: Vec<Result<Vec<u8>, TransportError>>,
    fail: Option<TransportError>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new(status: u16, chunks: &[&str]) -> Arc<Self> {
        Arc::new(MockTransport {
            status,
            chunks: chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect(),
            fail: None,
            requests: Mutex::new(vec![]),
        })
    }

    /// 按字节切分的响应体，切点可以落在多字节字符中间
    pub fn bytes(status: u16, chunks: &[&[u8]]) -> Arc<Self> {
        Arc::new(MockTransport {
            status,
            chunks: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
            fail: None,
            requests: Mutex::new(vec![]),
        })
    }

    pub fn json(status: u16, body: &Value) -> Arc<Self> {
        Self::new(status, &[body.to_string().as_str()])
    }

    /// 先发出 `chunks`，然后响应体读取失败
    pub fn broken_after(chunks: &[&str], error: TransportError) -> Arc<Self> {
        let mut body: Vec<Result<Vec<u8>, TransportError>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        body.push(Err(error));

        Arc::new(MockTransport {
            status: 200,
            chunks: body,
            fail: None,
            requests: Mutex::new(vec![]),
        })
    }

    pub fn unreachable(error: TransportError) -> Arc<Self> {
        Arc::new(MockTransport {
            status: 0,
            chunks: vec![],
            fail: Some(error),
            requests: Mutex::new(vec![]),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);

        if let Some(err) = &self.fail {
            return Err(err.clone());
        }

        Ok(HttpResponse {
            status: self.status,
            body: Box::pin(stream::iter(self.chunks.clone())),
        })
    }
}

/// 拼成一帧 `data:` 事件
pub fn sse_frame(value: &Value) -> String {
    format!("data: {}\r\n\r\n", value)
}

pub fn text_frame(text: &str) -> String {
    sse_frame(&serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }]
    }))
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
