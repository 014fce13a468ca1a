use thiserror::Error;

/// Benchmark failures
#[derive(Debug, Error)]
pub enum Error {
    /// Command line argument is missing or malformed
    #[error("bad argument `{0}`")]
    Argument(&'static str),
    /// Files of a previous run could not be removed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Tree operation failed
    #[error("tree error: {0:#}")]
    Tree(#[from] anyhow::Error),
    /// Value read back differs from the written one
    #[error("value mismatch for key {0}")]
    Mismatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
