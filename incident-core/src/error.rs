use alert_registry::PayloadError;
use thiserror::Error;

/// Fatal pipeline errors. Everything else degrades to an audit note.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Failure to wire the production collaborators at startup.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Ticketing(#[from] TicketError),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build telemetry client: {0}")]
    Client(String),
    #[error("telemetry request failed: {0}")]
    Transport(String),
    #[error("telemetry request timed out")]
    Timeout,
    #[error("telemetry backend returned status {0}")]
    Status(u16),
    #[error("invalid telemetry response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("knowledge service url is not configured")]
    NotConfigured,
    #[error("failed to initialize knowledge client: {0}")]
    Initialization(String),
    #[error("knowledge request failed: {0}")]
    Transport(String),
    #[error("knowledge request timed out")]
    Timeout,
    #[error("knowledge service returned status {0}")]
    Status(u16),
    #[error("invalid knowledge response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("failed to build ticketing client: {0}")]
    Client(String),
    #[error("ticketing request failed: {0}")]
    Transport(String),
    #[error("ticketing request timed out")]
    Timeout,
    #[error("ticketing backend returned status {0}")]
    Status(u16),
    #[error("invalid ticketing response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidEnvVar { var: String, message: String },
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TelemetryError::Timeout
        } else if let Some(status) = err.status() {
            TelemetryError::Status(status.as_u16())
        } else if err.is_decode() {
            TelemetryError::Decode(err.to_string())
        } else {
            TelemetryError::Transport(err.to_string())
        }
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RetrievalError::Timeout
        } else if let Some(status) = err.status() {
            RetrievalError::Status(status.as_u16())
        } else if err.is_decode() {
            RetrievalError::Decode(err.to_string())
        } else {
            RetrievalError::Transport(err.to_string())
        }
    }
}

impl From<reqwest::Error> for TicketError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TicketError::Timeout
        } else if let Some(status) = err.status() {
            TicketError::Status(status.as_u16())
        } else if err.is_decode() {
            TicketError::Decode(err.to_string())
        } else {
            TicketError::Transport(err.to_string())
        }
    }
}
