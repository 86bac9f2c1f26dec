//! 插件使用的 HTTP 传输能力
//!
//! 翻译插件只依赖 [`HttpTransport`]，宿主可以注入自己的实现；
//! 默认实现 [`ReqwestTransport`] 基于 reqwest，响应体以字节流的形式交给调用方，
//! 流式接口因此可以边收边解析。

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::{Client, Method};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("请求超时（超过 {} 秒）", .0.as_secs())]
    Timeout(Duration),
    #[error("网络请求失败: {0}")]
    Network(String),
}

impl TransportError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else {
            // URL 里带着 key
            TransportError::Network(err.without_url().to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// 整个请求（含读取响应体）的时限
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn post_json(url: impl Into<String>, body: String, timeout: Duration) -> Self {
        HttpRequest {
            method: Method::POST,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
            timeout,
        }
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 读取完整响应体
    pub async fn text(self) -> Result<String, TransportError> {
        let chunks: Vec<Vec<u8>> = self.body.try_collect().await?;
        Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        ReqwestTransport { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout;

        let mut builder = self
            .client
            .request(request.method, request.url.as_str())
            .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let status = response.status().as_u16();
        tracing::debug!("[HTTP] 响应状态: {}", status);

        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::from_reqwest(e, timeout))
            });

        Ok(HttpResponse {
            status,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
use anyhow::Result;

#[tokio::test]
async fn test_reqwest_transport_passes_status_and_body() -> Result<()> {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/v1beta/models/m:generateContent")
        .match_query(mockito::Matcher::UrlEncoded("key".into(), "k".into()))
        .match_header("content-type", "application/json")
        .match_body(r#"{"a":1}"#)
        .with_status(429)
        .with_body("slow down")
        .create_async()
        .await;

    let request = HttpRequest::post_json(
        format!("{}/v1beta/models/m:generateContent?key=k", server.url()),
        r#"{"a":1}"#.to_string(),
        Duration::from_secs(5),
    );

    let response = ReqwestTransport::new().send(request).await?;

    assert_eq!(response.status, 429);
    assert!(!response.is_success());
    assert_eq!(response.text().await?, "slow down");

    mock.assert_async().await;

    Ok(())
}

#[tokio::test]
async fn test_reqwest_transport_reports_unreachable_host() -> Result<()> {
    let request = HttpRequest::post_json(
        "http://127.0.0.1:9/unreachable",
        "{}".to_string(),
        Duration::from_secs(5),
    );

    let err = match ReqwestTransport::new().send(request).await {
        Ok(_) => anyhow::bail!("expected a transport error"),
        Err(err) => err,
    };

    assert!(matches!(err, TransportError::Network(_) | TransportError::Timeout(_)));

    Ok(())
}
