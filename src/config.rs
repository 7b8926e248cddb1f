//! Server configuration from environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

const DEFAULT_JWT_SECRET: &str = "portfolio-lens-dev-secret-change-me";

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// Secret used to sign JWT tokens
    pub jwt_secret: String,
    /// Token lifetime in seconds
    pub token_expiry_secs: u64,
    /// Annual risk-free rate used in risk-adjusted return metrics
    pub risk_free_rate: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let host: IpAddr = std::env::var("HOST")
            .ok()
            .and_then(|h| h.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3030);

        let db_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("portfolio.db"));

        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set, using insecure default");
            DEFAULT_JWT_SECRET.to_string()
        });

        let token_expiry_secs = std::env::var("TOKEN_EXPIRY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);

        let risk_free_rate = std::env::var("RISK_FREE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.04);

        Self {
            bind_addr: SocketAddr::new(host, port),
            db_path,
            jwt_secret,
            token_expiry_secs,
            risk_free_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_honors_host_and_port() {
        std::env::set_var("HOST", "0.0.0.0");
        std::env::set_var("PORT", "8080");
        let config = Config::from_env();
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());

        // unparsable values fall back to the defaults
        std::env::set_var("HOST", "not-an-ip");
        std::env::set_var("PORT", "not-a-port");
        let config = Config::from_env();
        assert_eq!(config.bind_addr, "127.0.0.1:3030".parse().unwrap());

        std::env::remove_var("HOST");
        std::env::remove_var("PORT");
    }
}
