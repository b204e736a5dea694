use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported database backend '{0}'")]
    UnsupportedBackend(String),

    #[error("Invalid database URI: {0}")]
    InvalidUri(String),

    #[error("Executable not found: {0}")]
    MissingExecutable(String),

    #[error("Command `{command}` failed with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RestoreError>;
