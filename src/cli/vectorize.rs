use anyhow::bail;
use clap::Parser;
use log::{info, warn};

use crate::blob::BlobLocation;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::extractor::ExtractorOptions;
use crate::gcp::CloudOptions;
use crate::vectorizer::{
    BatchTask, BatchVectorizer, DEFAULT_CATEGORIES, FailurePolicy, category_for, destination_for,
};

#[derive(Parser, Debug, Clone)]
pub struct VectorizeCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub cloud: CloudOptions,
    /// 图片根目录，图片位于 `{source}/{category}/` 下，支持 gs:// 与本地目录
    #[arg(
        long,
        env = "SOURCE_ROOT",
        value_name = "URI",
        default_value = "gs://cloud-samples-data/ai-platform/flowers"
    )]
    pub source: String,
    /// 输出根目录
    #[arg(long, env = "DESTINATION_ROOT", value_name = "URI")]
    pub destination_root: String,
    /// 任务序号，用于选择处理的分类
    #[arg(long, env = "CLOUD_RUN_TASK_INDEX", value_name = "N", default_value_t = 0)]
    pub task_index: usize,
    /// 分类列表，多个分类用逗号分隔
    #[arg(long, value_name = "LIST", value_delimiter = ',', default_value = DEFAULT_CATEGORIES)]
    pub categories: Vec<String>,
    /// 是否为建索引任务，建索引任务的结果写入 `{destination_root}/{category}/`
    #[arg(long, env = "INDEX_BUILD_TASK")]
    pub index_build_task: bool,
    /// 非建索引任务的输出子目录
    #[arg(long, value_name = "DIR", default_value = "flowers")]
    pub flat_dir: String,
    /// 单张图片失败时的处理方式
    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort)]
    pub on_error: FailurePolicy,
}

impl SubCommandExtend for VectorizeCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let category = category_for(&self.categories, self.task_index)?;
        let source = BlobLocation::parse(&self.source)?;
        let root = BlobLocation::parse(&self.destination_root)?;
        let destination =
            destination_for(&root, category, self.index_build_task, &self.flat_dir);
        info!("任务 {} 处理分类 {}，输出到 {}", self.task_index, category, destination);

        let extractor = self.extractor.build()?;
        let vectorizer = BatchVectorizer::new(
            extractor,
            source.open(&self.cloud)?,
            destination.open(&self.cloud)?,
        )
        .policy(self.on_error)
        .retry(self.cloud.retry_policy());

        let task = BatchTask { category: category.to_string(), source, destination };
        let report = vectorizer.run(&task).await?;
        info!("写入 {} 条记录: {}", report.written, report.output);

        if !report.failed.is_empty() {
            for id in &report.failed {
                warn!("失败: {id}");
            }
            bail!("{} 张图片处理失败，{} 张成功", report.failed.len(), report.written);
        }
        Ok(())
    }
}
