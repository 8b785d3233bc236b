use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Json;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use log::info;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::error::FetchError;
use crate::extractor::extract_blocking;
use crate::index::Datapoint;
use crate::metrics;

/// 健康检查，不依赖模型和索引状态
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, body = RootResponse),
    )
)]
pub async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse { ok: true })
}

/// 计算一张图片的特征向量并写入索引
#[utoipa::path(
    post,
    path = "/embeddings",
    request_body = CreateEmbeddingRequest,
    responses(
        (status = 200, body = CreateEmbeddingResponse),
        (status = 404, body = ErrorResponse, description = "图片不存在"),
        (status = 422, body = ErrorResponse, description = "图片无法解码"),
    )
)]
pub async fn create_embedding_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEmbeddingRequest>,
) -> Result<Json<CreateEmbeddingResponse>> {
    let name = req.name.trim_start_matches('/');
    if name.is_empty() {
        return Err(AppError::bad_request("name 不能为空"));
    }

    let start = Instant::now();
    let path = state.source.join(name);
    info!("正在处理图片: {}", path);

    let data = state
        .retry
        .run(&path, FetchError::is_retriable, || state.blobs.download(&path))
        .await
        .with_context(|| format!("下载图片失败: {name}"))?;

    let embedding = extract_blocking(state.extractor.clone(), data)
        .await
        .with_context(|| format!("提取特征失败: {name}"))?;

    let datapoint = Datapoint { id: name.to_string(), embedding };
    state
        .index
        .upsert(&state.index_name, std::slice::from_ref(&datapoint))
        .await
        .with_context(|| format!("写入索引失败: {name}"))?;

    info!("{} 处理完成，耗时 {}ms", name, start.elapsed().as_millis());
    Ok(Json(CreateEmbeddingResponse { id: datapoint.id, embedding: datapoint.embedding }))
}

/// Prometheus 指标
pub async fn metrics_handler() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::gather_text())
}
