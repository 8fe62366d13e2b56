//! Start-up configuration read from the environment.
//!
//! | variable | default | meaning |
//! |---|---|---|
//! | `CARELINK_BIND` | `0.0.0.0` | listen address |
//! | `CARELINK_HTTP_PORT` | `8080` | listen port |
//! | `CARELINK_DATA_DIR` | unset | snapshot directory; unset keeps everything in memory |
//! | `CARELINK_SEED_DEMO` | `false` | seed demo accounts into an empty store |

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub http_port: u16,
    pub data_dir: Option<PathBuf>,
    pub seed_demo: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: IpAddr::from([0, 0, 0, 0]), http_port: 8080, data_dir: None, seed_demo: false }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", name, other)),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("CARELINK_BIND") {
            cfg.bind = v.trim().parse().with_context(|| format!("CARELINK_BIND is not an IP address: '{}'", v))?;
        }
        if let Some(v) = lookup("CARELINK_HTTP_PORT") {
            cfg.http_port = v.trim().parse().with_context(|| format!("CARELINK_HTTP_PORT is not a port: '{}'", v))?;
        }
        if let Some(v) = lookup("CARELINK_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            cfg.data_dir = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = lookup("CARELINK_SEED_DEMO") {
            cfg.seed_demo = parse_bool("CARELINK_SEED_DEMO", &v)?;
        }
        Ok(cfg)
    }

    pub fn socket_addr(&self) -> SocketAddr { SocketAddr::new(self.bind, self.http_port) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|k| m.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c, ServerConfig::default());
        assert_eq!(c.socket_addr().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn overrides_are_parsed() {
        let c = cfg(&[
            ("CARELINK_BIND", "127.0.0.1"),
            ("CARELINK_HTTP_PORT", "9001"),
            ("CARELINK_DATA_DIR", "/var/lib/carelink"),
            ("CARELINK_SEED_DEMO", "Yes"),
        ]).unwrap();
        assert_eq!(c.socket_addr().to_string(), "127.0.0.1:9001");
        assert_eq!(c.data_dir, Some(PathBuf::from("/var/lib/carelink")));
        assert!(c.seed_demo);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(cfg(&[("CARELINK_HTTP_PORT", "http")]).is_err());
        assert!(cfg(&[("CARELINK_BIND", "localhost")]).is_err());
        assert!(cfg(&[("CARELINK_SEED_DEMO", "maybe")]).is_err());
        assert_eq!(cfg(&[("CARELINK_DATA_DIR", "  ")]).unwrap().data_dir, None);
    }
}
