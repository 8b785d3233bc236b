use clap::{Parser, Subcommand};

use crate::cli::*;

#[derive(Parser, Debug, Clone)]
#[command(name = "imembed", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 批量计算一个分类下所有图片的特征向量
    Vectorize(VectorizeCommand),
    /// 启动在线写入服务
    Server(ServerCommand),
    /// 查询与图片最相似的近邻
    Search(SearchCommand),
}
