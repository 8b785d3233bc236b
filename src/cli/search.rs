use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use crate::blob::BlobLocation;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::extractor::{ExtractorOptions, extract_blocking};
use crate::gcp::CloudOptions;
use crate::index::{DistanceMeasure, IndexClient, Neighbor, QueryTarget, VertexStore};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub cloud: CloudOptions,
    /// 索引端点资源名，例：projects/P/locations/L/indexEndpoints/E
    #[arg(long, env = "INDEX_ENDPOINT_NAME", value_name = "NAME")]
    pub index_endpoint_name: String,
    /// 已部署索引 id
    #[arg(long, env = "DEPLOYED_INDEX_ID", value_name = "ID")]
    pub deployed_index_id: String,
    /// 被搜索的图片路径，支持本地文件与 gs://
    #[arg(long, value_name = "PATH")]
    pub image_path: String,
    /// 返回的近邻数量
    #[arg(short, value_name = "K", default_value_t = 5)]
    pub k: usize,
    /// 索引创建时配置的距离度量
    #[arg(
        long,
        env = "DISTANCE_MEASURE",
        value_enum,
        default_value_t = DistanceMeasure::SquaredL2
    )]
    pub distance_measure: DistanceMeasure,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SearchCommand {
    async fn read_image(&self) -> Result<Vec<u8>> {
        let location = BlobLocation::parse(&self.image_path)?;
        let data = match &location {
            BlobLocation::Gcs { base, .. } => location.open(&self.cloud)?.download(base).await?,
            BlobLocation::Local { root } => tokio::fs::read(root).await?,
        };
        Ok(data)
    }
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let extractor = self.extractor.build()?;
        let data = self
            .read_image()
            .await
            .with_context(|| format!("读取图片失败: {}", self.image_path))?;
        let vector = extract_blocking(extractor.clone(), data).await?;

        let mut store = VertexStore::new(self.cloud.http_client()?, self.cloud.credentials());
        if let Some(endpoint) = &self.cloud.api_endpoint {
            store = store.with_api_endpoint(endpoint);
        }
        let client = IndexClient::new(Arc::new(store), extractor.dim())
            .with_retry(self.cloud.retry_policy())
            .with_distance_measure(self.distance_measure);

        let target = QueryTarget::new(&self.index_endpoint_name, &self.deployed_index_id);
        info!("查询 {} 的 {} 个近邻", self.image_path, self.k);
        let neighbors = client.query(&target, &vector, self.k).await?;

        print_result(&neighbors, self.output_format)
    }
}

fn print_result(result: &[Neighbor], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for neighbor in result {
                println!("{}: distance={}", neighbor.id, neighbor.distance);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
