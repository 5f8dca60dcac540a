//! Runtime configuration sourced from environment variables. Loading is
//! fatal at startup: an inconsistent configuration (security enabled with
//! no shared secret, TLS enabled with no cert/key) is reported and the
//! process exits rather than letting the relay come up half-configured.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub use_tls: bool,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    pub tls_ca_file: Option<String>,
    pub security_enabled: bool,
    pub shared_secret: Option<String>,
}

impl Config {
    /// Loads configuration from the environment. Returns `Err` with a
    /// human-readable message on an inconsistent configuration; the caller
    /// is expected to report it and exit rather than unwind.
    pub fn from_env() -> Result<Self, String> {
        let port = env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let use_tls = env_flag("USE_TLS");
        let security_enabled = env_flag("SWAP_SECURITY_ENABLED");
        let shared_secret = env::var("SWAP_SHARED_SECRET").ok();

        if security_enabled && shared_secret.is_none() {
            return Err("SWAP_SECURITY_ENABLED=true requires SWAP_SHARED_SECRET to be set".to_owned());
        }

        let tls_cert_file = env::var("TLS_CERT_FILE").ok();
        let tls_key_file = env::var("TLS_KEY_FILE").ok();
        let tls_ca_file = env::var("TLS_CA_FILE").ok();
        if use_tls && (tls_cert_file.is_none() || tls_key_file.is_none()) {
            return Err("USE_TLS=true requires TLS_CERT_FILE and TLS_KEY_FILE to be set".to_owned());
        }

        Ok(Self {
            port,
            use_tls,
            tls_cert_file,
            tls_key_file,
            tls_ca_file,
            security_enabled,
            shared_secret,
        })
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
}
