use thiserror::Error;

#[derive(Error, Debug)]
pub enum DltRelayError {
    #[error("Missing config file: {0}")]
    MissingConfigFile(String),
    #[error("Config file parsing error: {0}")]
    ConfigFileParsingError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Failed to bind socket: {0}")]
    BindFailed(std::io::Error),
    #[error("Tokio error: {0}")]
    TokioError(#[from] tokio::io::Error),
}
