pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod gcp;
pub mod index;
mod metrics;
pub mod retry;
pub mod server;
pub mod utils;
pub mod vectorizer;

pub use config::Opts;
