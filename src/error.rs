use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),

    #[error("failed to parse config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse address: {0}")]
    Addr(#[from] std::net::AddrParseError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
