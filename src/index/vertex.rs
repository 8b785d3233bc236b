use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Datapoint, Neighbor, QueryTarget, VectorStore};
use crate::error::{QueryError, UpsertError};
use crate::gcp::{Credentials, is_transient_status, regional_api_endpoint};

/// Vertex AI Vector Search 的 REST 客户端
pub struct VertexStore {
    client: Client,
    credentials: Credentials,
    /// 覆盖区域 API 地址
    api_endpoint: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexDatapoint<'a> {
    datapoint_id: &'a str,
    feature_vector: &'a [f32],
}

#[derive(Serialize)]
struct UpsertDatapointsRequest<'a> {
    datapoints: Vec<IndexDatapoint<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FindNeighborsQuery<'a> {
    datapoint: IndexDatapoint<'a>,
    neighbor_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FindNeighborsRequest<'a> {
    deployed_index_id: &'a str,
    queries: Vec<FindNeighborsQuery<'a>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FindNeighborsResponse {
    #[serde(default)]
    nearest_neighbors: Vec<NearestNeighbors>,
}

#[derive(Deserialize)]
struct NearestNeighbors {
    #[serde(default)]
    neighbors: Vec<FoundNeighbor>,
}

#[derive(Deserialize)]
struct FoundNeighbor {
    datapoint: NeighborDatapoint,
    distance: Option<f32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborDatapoint {
    datapoint_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEndpointResource {
    public_endpoint_domain_name: Option<String>,
}

/// 网络层错误：超时、连接失败等视为暂时性错误
fn is_transient_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

async fn error_body(resp: Response) -> String {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    format!("status {status}: {text}")
}

impl VertexStore {
    pub fn new(client: Client, credentials: Credentials) -> Self {
        Self { client, credentials, api_endpoint: None }
    }

    pub fn with_api_endpoint(mut self, api_endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(api_endpoint.into().trim_end_matches('/').to_string());
        self
    }

    fn api_for(&self, resource: &str) -> anyhow::Result<String> {
        match &self.api_endpoint {
            Some(api) => Ok(api.clone()),
            None => regional_api_endpoint(resource),
        }
    }

    /// 获取端点的公共域名，未开启公共端点时使用区域 API 地址
    ///
    /// 公共域名沿用 API 地址的协议，本地模拟服务可以是 `http`。
    async fn query_base(&self, endpoint: &str) -> Result<String, QueryError> {
        let api = self.api_for(endpoint).map_err(|e| QueryError::Misconfigured(e.to_string()))?;
        let req = self.client.get(format!("{api}/v1/{endpoint}"));
        let resp = self
            .credentials
            .authorize(&self.client, req)
            .await
            .map_err(QueryError::from)?
            .send()
            .await
            .map_err(|e| query_network_error(&e))?;
        let resp = check_query_status(resp).await?;
        let resource: IndexEndpointResource =
            resp.json().await.map_err(|e| QueryError::Rejected(e.to_string()))?;
        Ok(match resource.public_endpoint_domain_name.filter(|d| !d.is_empty()) {
            Some(domain) => {
                let scheme = if api.starts_with("http://") { "http" } else { "https" };
                format!("{scheme}://{domain}")
            }
            None => api,
        })
    }
}

fn query_network_error(e: &reqwest::Error) -> QueryError {
    if is_transient_error(e) {
        QueryError::Transient(e.to_string())
    } else {
        QueryError::Rejected(e.to_string())
    }
}

async fn check_query_status(resp: Response) -> Result<Response, QueryError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = error_body(resp).await;
    Err(match status {
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            QueryError::Misconfigured(message)
        }
        s if is_transient_status(s) => QueryError::Transient(message),
        _ => QueryError::Rejected(message),
    })
}

#[async_trait]
impl VectorStore for VertexStore {
    async fn upsert(&self, index: &str, datapoints: &[Datapoint]) -> Result<(), UpsertError> {
        let api = self.api_for(index).map_err(|e| UpsertError::UnknownIndex(e.to_string()))?;
        let body = UpsertDatapointsRequest {
            datapoints: datapoints
                .iter()
                .map(|dp| IndexDatapoint { datapoint_id: &dp.id, feature_vector: &dp.embedding })
                .collect(),
        };
        debug!("upsertDatapoints: {} 个数据点 -> {}", datapoints.len(), index);

        let req = self.client.post(format!("{api}/v1/{index}:upsertDatapoints")).json(&body);
        let resp = self
            .credentials
            .authorize(&self.client, req)
            .await
            .map_err(UpsertError::from)?
            .send()
            .await
            .map_err(|e| {
                if is_transient_error(&e) {
                    UpsertError::Transient(e.to_string())
                } else {
                    UpsertError::Rejected(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let message = error_body(resp).await;
        Err(match status {
            StatusCode::NOT_FOUND => UpsertError::UnknownIndex(format!("{index}: {message}")),
            s if is_transient_status(s) => UpsertError::Transient(message),
            _ => UpsertError::Rejected(message),
        })
    }

    async fn query(
        &self,
        target: &QueryTarget,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, QueryError> {
        let endpoint = &target.index_endpoint;
        let base = self.query_base(endpoint).await?;
        let body = FindNeighborsRequest {
            deployed_index_id: &target.deployed_index_id,
            queries: vec![FindNeighborsQuery {
                datapoint: IndexDatapoint { datapoint_id: "query", feature_vector: vector },
                neighbor_count: k,
            }],
        };
        debug!("findNeighbors: {} @ {}", target.deployed_index_id, base);

        let req = self.client.post(format!("{base}/v1/{endpoint}:findNeighbors")).json(&body);
        let resp = self
            .credentials
            .authorize(&self.client, req)
            .await
            .map_err(QueryError::from)?
            .send()
            .await
            .map_err(|e| query_network_error(&e))?;
        let resp = check_query_status(resp).await?;
        let result: FindNeighborsResponse =
            resp.json().await.map_err(|e| QueryError::Rejected(e.to_string()))?;

        result
            .nearest_neighbors
            .into_iter()
            .next()
            .map(|nn| nn.neighbors)
            .unwrap_or_default()
            .into_iter()
            .map(|n| {
                let id = n.datapoint.datapoint_id;
                match n.distance {
                    Some(distance) => Ok(Neighbor { id, distance }),
                    None => Err(QueryError::Rejected(format!("近邻 {id} 缺少距离"))),
                }
            })
            .collect()
    }
}
