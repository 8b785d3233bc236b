use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 健康检查响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RootResponse {
    pub ok: bool,
}

/// 创建向量请求
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateEmbeddingRequest {
    /// 图片在数据源下的相对路径，同时作为数据点 id
    /// 例：`tulips/100930342_92e8746431_n.jpg`
    pub name: String,
}

/// 创建向量响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateEmbeddingResponse {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
