mod search;
mod server;
mod vectorize;

pub use search::*;
pub use server::*;
pub use vectorize::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
