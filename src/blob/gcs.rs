use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

use super::BlobStore;
use crate::error::FetchError;
use crate::gcp::{Credentials, is_transient_status};

const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Cloud Storage JSON API 客户端，对应一个 bucket
pub struct GcsBlobStore {
    bucket: String,
    client: Client,
    credentials: Credentials,
    endpoint: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsPage {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectItem {
    name: String,
}

impl GcsBlobStore {
    pub fn new(bucket: impl Into<String>, client: Client, credentials: Credentials) -> Self {
        Self {
            bucket: bucket.into(),
            client,
            credentials,
            endpoint: STORAGE_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// `{endpoint}/{prefix}/b/{bucket}/o[/{object}]`，对象名作为单独的路径段编码
    fn object_url(&self, prefix: &str, object: Option<&str>) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| FetchError::Rejected(format!("无效的存储地址 {}: {e}", self.endpoint)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FetchError::Rejected(format!("无效的存储地址 {}", self.endpoint)))?;
            segments.pop_if_empty();
            segments.extend(prefix.split('/'));
            segments.extend(["b", self.bucket.as_str(), "o"]);
            if let Some(object) = object {
                segments.push(object);
            }
        }
        Ok(url)
    }

    async fn send(&self, path: &str, req: RequestBuilder) -> Result<Response, FetchError> {
        let resp = self
            .credentials
            .authorize(&self.client, req)
            .await
            .map_err(FetchError::from)?
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    FetchError::Transient(format!("{path}: {e}"))
                } else {
                    FetchError::Rejected(format!("{path}: {e}"))
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => FetchError::NotFound(format!("gs://{}/{path}", self.bucket)),
            s if is_transient_status(s) => FetchError::Transient(format!("{path}: {s} {text}")),
            s => FetchError::Rejected(format!("{path}: {s} {text}")),
        })
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, FetchError> {
        let mut names = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.object_url("storage/v1", None)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                query.append_pair("fields", "items/name,nextPageToken");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let page: ListObjectsPage = self
                .send(prefix, self.client.get(url))
                .await?
                .json()
                .await
                .map_err(|e| FetchError::Rejected(format!("{prefix}: {e}")))?;
            // 控制台创建的“目录”是以 `/` 结尾的空对象
            names.extend(page.items.into_iter().map(|i| i.name).filter(|n| !n.ends_with('/')));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        names.sort();
        debug!("gs://{}/{} 共 {} 个对象", self.bucket, prefix, names.len());
        Ok(names)
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let mut url = self.object_url("storage/v1", Some(path))?;
        url.query_pairs_mut().append_pair("alt", "media");
        let resp = self.send(path, self.client.get(url)).await?;
        let bytes =
            resp.bytes().await.map_err(|e| FetchError::Transient(format!("{path}: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), FetchError> {
        let mut url = self.object_url("upload/storage/v1", None)?;
        url.query_pairs_mut().append_pair("uploadType", "media").append_pair("name", path);
        let req =
            self.client.post(url).header("Content-Type", "application/octet-stream").body(data);
        self.send(path, req).await?;
        Ok(())
    }
}
