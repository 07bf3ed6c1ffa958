#[derive(Debug, thiserror::Error)]
pub enum BrokerLoadTestError {
    #[error("fatal error: {0}")]
    Fatal(String),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("client error: {0}")]
    ClientError(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("client name pool exhausted")]
    NamePoolExhausted,
}
