//! Unified error types for the perun codebase.

use std::fmt;

/// Error produced while decoding wire fields.
#[derive(Debug)]
pub enum CodecError {
    /// Input ran out in the middle of a field
    Truncated,
    /// A field violates the wire format
    Invalid(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "input ended mid-field"),
            CodecError::Invalid(what) => write!(f, "invalid field: {}", what),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for std::io::Error {
    fn from(e: CodecError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    }
}

/// Error type for server configuration validation.
///
/// Raised only at construction time; a running server never produces one.
#[derive(Debug)]
pub enum ConfigError {
    /// Listen port is zero
    InvalidPort,
    /// TLS mode selected without a certificate bundle
    MissingTlsIdentity,
    /// Allow-list entry is not a parseable IP address
    BadAllowIp(String),
    /// TLS certificate material could not be read or parsed
    Tls(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "listen port must be >= 1"),
            ConfigError::MissingTlsIdentity => {
                write!(f, "tls.enabled is set but tls.cert_path or tls.key_path is empty")
            }
            ConfigError::BadAllowIp(ip) => write!(f, "allow-list entry is not an IP: {}", ip),
            ConfigError::Tls(msg) => write!(f, "TLS identity: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
