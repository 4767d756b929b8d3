//! 基于 HTTP 的注册中心传输层
//!
//! - `GET /services/{name}`：返回单个对象或数组，404 表示不存在
//! - `PUT /services/{name}`：upsert 注册
//! - `DELETE /services/{name}`：删除，404 视为成功
//! - `GET /health/{name}`：健康检查
//! - `GET /watch/{name}`：`text/event-stream` 推送

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client as HttpClient, Response, StatusCode, Url};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use tracing::debug;

use super::sse::SseDecoder;
use super::{RegistryTransport, TransportError, WatchStream};
use crate::config::ClientConfig;
use crate::discovery::ServiceRecord;
use crate::error::{DiscoveryError, Result};
use crate::health::HealthReport;
use crate::registry::Registration;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// `GET /services/{name}` 的响应体：单个对象或数组
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ServiceRecord>),
    One(ServiceRecord),
}

impl From<OneOrMany> for Vec<ServiceRecord> {
    fn from(body: OneOrMany) -> Self {
        match body {
            OneOrMany::Many(records) => records,
            OneOrMany::One(record) => vec![record],
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.without_url().to_string())
        } else {
            TransportError::Connection(e.without_url().to_string())
        }
    }
}

/// HTTP 传输层
pub struct HttpTransport {
    http_client: HttpClient,
    base_url: Url,
}

impl HttpTransport {
    /// 根据客户端配置创建传输层
    ///
    /// API key 以 `Authorization: Bearer` 默认请求头发送，并标记为敏感值
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let base_url = Url::parse(&config.registry_url)
            .map_err(|e| DiscoveryError::Config(format!("invalid registry_url: {}", e)))?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| DiscoveryError::Config("api_key contains invalid characters".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http_client = HttpClient::builder()
            .default_headers(headers)
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| DiscoveryError::Config(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn endpoint(&self, resource: &str, name: &str) -> std::result::Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Connection("registry_url cannot be a base".into()))?
            .pop_if_empty()
            .push(resource)
            .push(name);
        Ok(url)
    }
}

fn check_status(resp: Response) -> std::result::Result<Response, TransportError> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        Err(TransportError::NotFound)
    } else if status.is_success() {
        Ok(resp)
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

fn decode_event(data: &str) -> std::result::Result<ServiceRecord, TransportError> {
    serde_json::from_str(data).map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn fetch(&self, name: &str) -> std::result::Result<Vec<ServiceRecord>, TransportError> {
        let url = self.endpoint("services", name)?;
        let resp = check_status(self.http_client.get(url).send().await?)?;
        let body: OneOrMany = resp.json().await?;
        Ok(body.into())
    }

    async fn upsert(&self, registration: &Registration) -> std::result::Result<(), TransportError> {
        let url = self.endpoint("services", &registration.name)?;
        let resp = self.http_client.put(url).json(registration).send().await?;
        check_status(resp)?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> std::result::Result<(), TransportError> {
        let url = self.endpoint("services", name)?;
        let resp = self.http_client.delete(url).send().await?;
        match check_status(resp) {
            Ok(_) | Err(TransportError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn health(&self, name: &str) -> std::result::Result<HealthReport, TransportError> {
        let url = self.endpoint("health", name)?;
        let resp = check_status(self.http_client.get(url).send().await?)?;
        Ok(resp.json().await?)
    }

    async fn open_watch(&self, name: &str) -> std::result::Result<WatchStream, TransportError> {
        let url = self.endpoint("watch", name)?;
        let resp = self
            .http_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check_status(resp)?;
        debug!(service = %name, "Watch stream opened");

        let bytes: ByteStream = Box::pin(resp.bytes_stream());
        let state = (bytes, SseDecoder::default(), VecDeque::<String>::new(), false);
        let stream = futures::stream::unfold(
            state,
            |(mut bytes, mut decoder, mut pending, done)| async move {
                loop {
                    if let Some(data) = pending.pop_front() {
                        return Some((decode_event(&data), (bytes, decoder, pending, done)));
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.feed(&chunk)),
                        Some(Err(e)) => {
                            return Some((Err(e.into()), (bytes, decoder, pending, true)));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        let config =
            ClientConfig::new("secret-key").with_registry_url("http://registry.local:8500/api/");
        HttpTransport::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_name() {
        let transport = transport();
        let url = transport.endpoint("services", "orders v2").unwrap();
        assert_eq!(url.as_str(), "http://registry.local:8500/api/services/orders%20v2");
    }

    #[test]
    fn test_debug_hides_credentials() {
        let rendered = format!("{:?}", transport());
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn test_body_accepts_object_or_array() {
        let one = r#"{"name":"orders","url":"http://a","updatedAt":"2024-01-01T00:00:00Z"}"#;
        let many = format!("[{},{}]", one, one);
        let records: Vec<ServiceRecord> = serde_json::from_str::<OneOrMany>(one).unwrap().into();
        assert_eq!(records.len(), 1);
        let records: Vec<ServiceRecord> = serde_json::from_str::<OneOrMany>(&many).unwrap().into();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_decode_event_error() {
        assert!(matches!(decode_event("{"), Err(TransportError::Decode(_))));
    }
}
