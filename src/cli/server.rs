use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::info;
use tokio::net::TcpListener;

use crate::blob::BlobLocation;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::extractor::ExtractorOptions;
use crate::gcp::CloudOptions;
use crate::index::{IndexClient, MemoryStore, VectorStore, VertexStore};
use crate::server;

/// 向量索引后端
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Vertex AI Vector Search
    Vertex,
    /// 进程内索引，仅用于本地开发
    Memory,
}

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub cloud: CloudOptions,
    /// 监听地址，不填则使用 `0.0.0.0:$PORT`
    #[arg(long)]
    pub addr: Option<String>,
    /// 未指定监听地址时使用的端口
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
    /// 写入的索引资源名，例：projects/P/locations/L/indexes/I
    #[arg(long, env = "INDEX_NAME", value_name = "NAME")]
    pub index_name: String,
    /// 图片根目录
    #[arg(
        long,
        env = "SOURCE_ROOT",
        value_name = "URI",
        default_value = "gs://cloud-samples-data/ai-platform/flowers"
    )]
    pub source: String,
    /// 向量索引后端
    #[arg(long, value_enum, default_value_t = StoreKind::Vertex)]
    pub store: StoreKind,
}

impl ServerCommand {
    pub fn listen_addr(&self) -> String {
        self.addr.clone().unwrap_or_else(|| format!("0.0.0.0:{}", self.port))
    }

    async fn vector_store(&self, dim: usize) -> anyhow::Result<Arc<dyn VectorStore>> {
        Ok(match self.store {
            StoreKind::Vertex => {
                let mut store =
                    VertexStore::new(self.cloud.http_client()?, self.cloud.credentials());
                if let Some(endpoint) = &self.cloud.api_endpoint {
                    store = store.with_api_endpoint(endpoint);
                }
                Arc::new(store)
            }
            StoreKind::Memory => {
                let store = MemoryStore::new();
                store.create_index(&self.index_name, dim).await?;
                info!("使用进程内索引: {}", self.index_name);
                Arc::new(store)
            }
        })
    }
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let extractor = self.extractor.build()?;
        let source = BlobLocation::parse(&self.source)?;
        let blobs = source.open(&self.cloud)?;

        let store = self.vector_store(extractor.dim()).await?;
        let index =
            IndexClient::new(store, extractor.dim()).with_retry(self.cloud.retry_policy());

        // 创建应用状态
        let state = server::AppState::new(
            extractor,
            blobs,
            source,
            index,
            self.index_name.clone(),
            self.cloud.retry_policy(),
        );

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        let addr = self.listen_addr();
        info!("服务器启动：http://{}", addr);
        let listener = TcpListener::bind(&addr).await.with_context(|| format!("无法监听 {addr}"))?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
