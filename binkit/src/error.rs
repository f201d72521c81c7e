use thiserror::Error;

#[derive(Error, Debug)]
pub enum BinkitError {
    #[error("Invalid URL '{url}'. Expected an http:// or https:// address")]
    InvalidUrl { url: String },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to download {url}: HTTP {status} {reason}")]
    DownloadFailed {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("Failed to create decompression/extraction stream: {reason}")]
    StreamSetup { reason: String },

    #[error("Failed to extract archive into {dest}: {source}")]
    Extraction {
        dest: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive for {name} did not contain the expected executable at {path}")]
    MissingExecutable { name: String, path: String },

    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with status {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("Failed to parse JSON output of '{command}': {source}")]
    JsonOutput {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error at {path}: {message}")]
    Config { path: String, message: String },

    #[error("Invalid request header '{header}': {reason}. Expected format: 'Name: value'")]
    InvalidHeader { header: String, reason: String },

    #[error("Invalid HTTP method '{method}'")]
    InvalidMethod { method: String },

    #[error("Binary '{name}' is not configured. Provide --url and --tag, or add [binary.{name}] to the config. Configured binaries: {available}")]
    UnknownBinary { name: String, available: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BinkitError {
    /// Whether a failed request is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BinkitError::Transport { source, .. } => {
                source.is_timeout()
                    || source.is_connect()
                    || source
                        .status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(true)
            }
            BinkitError::DownloadFailed { status, .. } => *status >= 500 || *status == 429,
            BinkitError::Io(io_err) => {
                use std::io::ErrorKind;
                matches!(
                    io_err.kind(),
                    ErrorKind::ConnectionAborted
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionRefused
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                        | ErrorKind::UnexpectedEof
                )
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BinkitError>;
