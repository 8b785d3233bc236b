use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::retry::RetryPolicy;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// token 到期前提前刷新的时间，单位为秒
const TOKEN_REFRESH_MARGIN: u64 = 60;

/// 访问 Google Cloud API 所用的凭据
#[derive(Debug, Clone)]
pub enum Credentials {
    /// 不附带凭据，适用于公开数据和本地模拟服务
    Anonymous,
    /// 固定的 OAuth access token
    Static(String),
    /// 从 GCE / Cloud Run 元数据服务器获取 token，到期前复用
    Metadata(Arc<MetadataToken>),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// 元数据服务器上的 access token 及其缓存
#[derive(Debug)]
pub struct MetadataToken {
    url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataToken {
    async fn get(&self, client: &Client) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref().filter(|c| c.expires_at > Instant::now()) {
            return Ok(c.token.clone());
        }

        let resp = client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = format!("{}: {status}", self.url);
            return Err(if is_transient_status(status) {
                AuthError::Transient(message)
            } else {
                AuthError::Rejected(message)
            });
        }
        let token: TokenResponse =
            resp.json().await.map_err(|e| AuthError::Rejected(e.to_string()))?;

        debug!("获取 access token，{} 秒后过期", token.expires_in);
        let lifetime = token.expires_in.saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(token.access_token)
    }
}

impl Credentials {
    /// 使用默认元数据服务器
    pub fn metadata() -> Self {
        Self::metadata_at(METADATA_TOKEN_URL)
    }

    /// 使用指定地址的元数据服务器
    pub fn metadata_at(url: impl Into<String>) -> Self {
        Self::Metadata(Arc::new(MetadataToken { url: url.into(), cached: Mutex::new(None) }))
    }

    /// 为请求附加 `Authorization` 头
    pub async fn authorize(
        &self,
        client: &Client,
        req: RequestBuilder,
    ) -> Result<RequestBuilder, AuthError> {
        let token = match self {
            Self::Anonymous => return Ok(req),
            Self::Static(token) => token.clone(),
            Self::Metadata(source) => source.get(client).await?,
        };
        Ok(req.header(AUTHORIZATION, format!("Bearer {token}")))
    }
}

/// 由资源名推导区域 API 地址
///
/// 资源名形如 `projects/P/locations/L/indexes/I`，返回 `https://L-aiplatform.googleapis.com`。
pub fn regional_api_endpoint(resource: &str) -> Result<String> {
    let location = resource
        .split('/')
        .nth(3)
        .filter(|s| !s.is_empty())
        .with_context(|| format!("无法从资源名中解析区域: {resource}"))?;
    Ok(format!("https://{location}-aiplatform.googleapis.com"))
}

/// HTTP 状态码是否属于可重试的暂时性错误
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// 访问 Google Cloud 服务的公共参数
#[derive(Parser, Debug, Clone)]
pub struct CloudOptions {
    /// 覆盖 Vertex AI API 地址，用于模拟服务
    #[arg(long, env = "API_ENDPOINT", value_name = "URL")]
    pub api_endpoint: Option<String>,
    /// 覆盖 Cloud Storage API 地址
    #[arg(long, env = "STORAGE_ENDPOINT", value_name = "URL")]
    pub storage_endpoint: Option<String>,
    /// OAuth access token
    #[arg(long, env = "ACCESS_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
    /// 从元数据服务器获取 access token（Cloud Run / GCE 环境）
    #[arg(long, env = "USE_METADATA_TOKEN")]
    pub metadata_token: bool,
    /// 单次请求超时时间，单位为秒
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub timeout: u64,
    /// 暂时性错误的最大重试次数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub max_retries: u32,
}

impl CloudOptions {
    pub fn credentials(&self) -> Credentials {
        match (&self.access_token, self.metadata_token) {
            (Some(token), _) => Credentials::Static(token.clone()),
            (None, true) => Credentials::metadata(),
            (None, false) => Credentials::Anonymous,
        }
    }

    pub fn http_client(&self) -> Result<Client> {
        Ok(Client::builder().timeout(Duration::from_secs(self.timeout)).build()?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { max_retries: self.max_retries, ..RetryPolicy::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_from_resource_name() {
        let api = regional_api_endpoint("projects/123/locations/us-central1/indexes/456").unwrap();
        assert_eq!(api, "https://us-central1-aiplatform.googleapis.com");
        assert!(regional_api_endpoint("indexes/456").is_err());
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }
}
