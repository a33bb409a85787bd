use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-candidate probe failure. Never escapes the job that produced it.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid descriptor: {message}")]
    Config { message: String },

    #[error("parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("adapter error ({protocol}): {message}")]
    Adapter { message: String, protocol: String },

    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("malformed egress address: {0:?}")]
    MalformedEgress(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Coarse failure taxonomy used for logging and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    /// Connect, read, write or timeout failures
    Network,
    /// Descriptor or response could not be understood
    Parse,
    /// Descriptor is missing required fields or the adapter rejected it
    Configuration,
}

impl std::fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProbeErrorKind::Network => "network",
            ProbeErrorKind::Parse => "parse",
            ProbeErrorKind::Configuration => "configuration",
        })
    }
}

impl ProbeError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
            source: None,
        }
    }

    pub fn parse_with_source<S: Into<String>, E: Into<BoxError>>(message: S, source: E) -> Self {
        Self::Parse {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn adapter<S: Into<String>, P: Into<String>>(message: S, protocol: P) -> Self {
        Self::Adapter {
            message: message.into(),
            protocol: protocol.into(),
        }
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a lower-level failure; accepts io errors and anyhow errors alike
    pub fn network_with_source<S: Into<String>, E: Into<BoxError>>(message: S, source: E) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs: timeout.as_secs(),
        }
    }

    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => ProbeErrorKind::Network,
            Self::Parse { .. } | Self::MalformedEgress(_) => ProbeErrorKind::Parse,
            Self::Config { .. } | Self::Adapter { .. } => ProbeErrorKind::Configuration,
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        Self::network_with_source(e.to_string(), e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ProbeError::network("refused").kind(), ProbeErrorKind::Network);
        assert_eq!(
            ProbeError::timeout("fetch", Duration::from_secs(3)).kind(),
            ProbeErrorKind::Network
        );
        assert_eq!(
            ProbeError::MalformedEgress("<html>".into()).kind(),
            ProbeErrorKind::Parse
        );
        assert_eq!(
            ProbeError::config("port is zero").kind(),
            ProbeErrorKind::Configuration
        );
    }

    #[test]
    fn test_anyhow_source_is_kept() {
        let inner = anyhow::anyhow!("[ERR] SOCKS5 server refused connection");
        let err = ProbeError::network_with_source("socks5 connect failed", inner);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("[ERR] SOCKS5 server refused connection")
        );
    }
}
