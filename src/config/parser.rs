//! Configuration file parser.
//!
//! Parses TOML-style configuration files with a custom lightweight parser.

use super::types::*;
use std::{fs, io};

/// Load configuration from a file path.
pub fn load_config(path: &str) -> io::Result<Config> {
    let s = fs::read_to_string(path)?;
    parse_config(&s)
}

/// Parse configuration from a string.
fn parse_config(s: &str) -> io::Result<Config> {
    let mut cfg = Config::default();

    for (lineno, line) in s.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((lhs, rhs)) = line.split_once('=') else {
            continue;
        };
        let lhs = lhs.trim();
        let mut val = rhs.trim();
        if val.contains('#') {
            val = val.split('#').next().unwrap().trim();
        }

        let (section, key) = if let Some((a, b)) = lhs.split_once('.') {
            (a.trim(), b.trim())
        } else {
            ("", lhs)
        };

        if section.is_empty() {
            continue;
        }

        set_config_value(section, key, val, &mut cfg).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line {}: {}", lineno + 1, e),
            )
        })?;
    }

    Ok(cfg)
}

/// Set a configuration value based on section, key, and value strings.
fn set_config_value(section: &str, key: &str, val: &str, cfg: &mut Config) -> Result<(), String> {
    macro_rules! parse {
        (s) => {
            val.trim_matches('"').to_string()
        };
        (b) => {
            match val {
                "true" => true,
                "false" => false,
                _ => return Err(format!("bad bool {val}")),
            }
        };
        (u) => {
            val.parse::<u64>().map_err(|e| e.to_string())?
        };
        (usize_) => {
            val.parse::<usize>().map_err(|e| e.to_string())?
        };
        (u16_) => {
            val.parse::<u16>().map_err(|e| e.to_string())?
        };
    }

    match (section, key) {
        // Listen section
        ("listen", "ip") => cfg.listen.ip = parse!(s),
        ("listen", "port") => cfg.listen.port = parse!(u16_),

        // TLS section
        ("tls", "enabled") => cfg.tls.enabled = parse!(b),
        ("tls", "cert_path") => cfg.tls.cert_path = parse!(s),
        ("tls", "key_path") => cfg.tls.key_path = parse!(s),
        ("tls", "client_ca_path") => cfg.tls.client_ca_path = parse!(s),
        ("tls", "accept_invalid_peer_cert") => cfg.tls.accept_invalid_peer_cert = parse!(b),
        ("tls", "require_mutual_auth") => cfg.tls.require_mutual_auth = parse!(b),

        // Auth section
        ("auth", "shared_secret") => cfg.auth.shared_secret = parse!(s),
        ("auth", "grace_ms") => cfg.auth.grace_ms = parse!(u),

        // Allow-list section; comma-separated IPs
        ("allow", "ips") => {
            cfg.allow_ips = parse!(s)
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        // Limits section
        ("limits", "max_frame_bytes") => cfg.limits.max_frame_bytes = parse!(usize_),
        ("limits", "tls_handshake_timeout_ms") => {
            cfg.limits.tls_handshake_timeout_ms = parse!(u)
        }

        // Debug section
        ("debug", "verbose") => cfg.debug.verbose = parse!(b),

        _ => return Err(format!("unknown key {section}.{key}")),
    }

    Ok(())
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &str) -> io::Result<Self> {
        load_config(path)
    }
}
