use thiserror::Error;

/// 特征提取错误
#[derive(Debug, Error)]
pub enum ExtractError {
    /// 图片数据无法解码
    #[error("图片解码失败: {0}")]
    Decode(String),
    /// 模型推理失败
    #[error("模型推理失败: {0}")]
    Inference(String),
}

impl ExtractError {
    /// 提取是确定性的，重试不会改变结果
    pub fn is_retriable(&self) -> bool {
        false
    }
}

impl From<opencv::Error> for ExtractError {
    fn from(err: opencv::Error) -> Self {
        Self::Inference(err.to_string())
    }
}

/// 获取 access token 失败
#[derive(Debug, Error)]
pub enum AuthError {
    /// 元数据服务器超时、5xx 等
    #[error("获取 access token 暂时失败: {0}")]
    Transient(String),
    /// 不在 GCE / Cloud Run 上运行，或服务账号不可用
    #[error("获取 access token 被拒绝: {0}")]
    Rejected(String),
}

impl AuthError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<AuthError> for FetchError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Transient(_) => Self::Transient(err.to_string()),
            AuthError::Rejected(_) => Self::Rejected(err.to_string()),
        }
    }
}

impl From<AuthError> for UpsertError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Transient(_) => Self::Transient(err.to_string()),
            AuthError::Rejected(_) => Self::Rejected(err.to_string()),
        }
    }
}

impl From<AuthError> for QueryError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Transient(_) => Self::Transient(err.to_string()),
            AuthError::Rejected(_) => Self::Rejected(err.to_string()),
        }
    }
}

/// 对象存储读写错误
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("对象不存在: {0}")]
    NotFound(String),
    /// 网络抖动、超时、服务端 5xx
    #[error("对象存储暂时不可用: {0}")]
    Transient(String),
    #[error("对象存储拒绝请求: {0}")]
    Rejected(String),
}

impl FetchError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// 写入向量索引时的错误
#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("向量维度不匹配: {id} 期望 {expected}，实际 {actual}")]
    DimensionMismatch { id: String, expected: usize, actual: usize },
    #[error("索引不存在: {0}")]
    UnknownIndex(String),
    #[error("数据点不合法: {0}")]
    Invalid(String),
    #[error("索引服务拒绝请求: {0}")]
    Rejected(String),
    #[error("索引服务暂时不可用: {0}")]
    Transient(String),
}

impl UpsertError {
    /// upsert 按 id 幂等，只有网络层面的失败可以重试
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// 查询向量索引时的错误
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("查询向量维度不匹配: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("查询参数不合法: {0}")]
    Invalid(String),
    /// endpoint 或 deployed index id 配置错误
    #[error("索引端点配置错误: {0}")]
    Misconfigured(String),
    #[error("索引服务返回异常结果: {0}")]
    Rejected(String),
    #[error("索引服务暂时不可用: {0}")]
    Transient(String),
}

impl QueryError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// 批量向量化错误，错误总是归属于某一张图片或某个分类
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("分类 {0} 下没有图片")]
    Empty(String),
    #[error("{id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: FetchError,
    },
    #[error("{id}: {source}")]
    Extract {
        id: String,
        #[source]
        source: ExtractError,
    },
    #[error("写入结果失败: {0}")]
    Write(#[source] FetchError),
    #[error("序列化结果失败: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BatchError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Fetch { source, .. } | Self::Write(source) => source.is_retriable(),
            _ => false,
        }
    }
}
