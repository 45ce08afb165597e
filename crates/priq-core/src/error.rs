use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid priority value: {value} (max {max})")]
    InvalidPriority { value: u8, max: u8 },

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
