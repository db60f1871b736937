use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("container launch failed: {0}")]
    Launch(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("container teardown failed: {0}")]
    Teardown(String),

    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
