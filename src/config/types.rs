//! Configuration type definitions.

use crate::common::error::ConfigError;

/// Listening endpoint configuration.
#[derive(Clone, Debug)]
pub struct Listen {
    /// Bind IP; empty means all interfaces.
    pub ip: String,
    /// Bind port; must be >= 1.
    pub port: u16,
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: 9000,
        }
    }
}

/// TLS termination configuration.
///
/// Client certificates are requested on every handshake; the two policy
/// flags decide whether one is demanded and whether it is validated.
#[derive(Clone, Debug, Default)]
pub struct Tls {
    pub enabled: bool,
    /// PEM certificate chain presented to clients.
    pub cert_path: String,
    /// PEM private key matching `cert_path`.
    pub key_path: String,
    /// PEM trust bundle for validating peer certificates; empty means
    /// presented certificates are accepted unvalidated.
    pub client_ca_path: String,
    /// Skip validation of any certificate the peer presents.
    pub accept_invalid_peer_cert: bool,
    /// Reject connections whose peer did not present a certificate.
    pub require_mutual_auth: bool,
}

/// Shared-secret authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct Auth {
    /// Empty means the auth gate is disabled.
    pub shared_secret: String,
    /// Grace period before unauthenticated clients are dropped; 0 disables.
    pub grace_ms: u64,
}

/// Connection and resource limits.
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_frame_bytes: usize,
    pub tls_handshake_timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
            tls_handshake_timeout_ms: 5000,
        }
    }
}

/// Debug configuration.
#[derive(Clone, Debug, Default)]
pub struct Debug {
    /// Selects debug-level logging when RUST_LOG is unset.
    pub verbose: bool,
}

/// Root configuration container.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub listen: Listen,
    pub tls: Tls,
    pub auth: Auth,
    /// Peer IPs admitted by the acceptor; empty means allow any.
    pub allow_ips: Vec<String>,
    pub limits: Limits,
    pub debug: Debug,
}

impl Config {
    /// Check invariants the server constructor relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.tls.enabled && (self.tls.cert_path.is_empty() || self.tls.key_path.is_empty()) {
            return Err(ConfigError::MissingTlsIdentity);
        }
        for ip in &self.allow_ips {
            if ip.parse::<std::net::IpAddr>().is_err() {
                return Err(ConfigError::BadAllowIp(ip.clone()));
            }
        }
        Ok(())
    }

    /// The address string the listener binds to.
    pub fn bind_addr(&self) -> String {
        let ip = if self.listen.ip.is_empty() {
            "0.0.0.0"
        } else {
            &self.listen.ip
        };
        format!("{}:{}", ip, self.listen.port)
    }
}
