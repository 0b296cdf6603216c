use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::game::constants::spores;

/// Data directory inside the container image
pub const DOCKER_DATA_DIR: &str = "/gameserver/data";
/// Certificate mount inside the container image
pub const DOCKER_CERTS_DIR: &str = "/gameserver/certs";
/// Env file read when no `--config` argument is given
pub const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Port cannot be 0")]
    ZeroPort,
    #[error("Metrics port {0} clashes with the game port")]
    MetricsPortClash(u16),
    #[error("MAX_SPORES must be at least 1")]
    NoSpores,
    #[error("CERT_PATH and KEY_PATH must be set together")]
    HalfTlsPair,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Port for the metrics HTTP endpoint
    pub metrics_port: u16,
    /// Preferred data directory; falls back to the container and local paths
    pub data_path: Option<String>,
    /// PEM certificate chain
    pub cert_path: Option<String>,
    /// PEM private key
    pub key_path: Option<String>,
    /// Spore population the hub maintains
    pub max_spores: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            metrics_port: 9090,
            data_path: None,
            cert_path: None,
            key_path: None,
            max_spores: spores::MAX,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Some(port) = parse_port("PORT") {
            config.port = port;
        }

        if let Some(port) = parse_port("METRICS_PORT") {
            config.metrics_port = port;
        }

        if let Ok(max_spores) = std::env::var("MAX_SPORES") {
            match max_spores.parse::<usize>() {
                Ok(parsed) if parsed > 0 && parsed <= 100_000 => config.max_spores = parsed,
                Ok(_) => tracing::warn!("MAX_SPORES must be 1-100000, using default"),
                Err(_) => tracing::warn!("Invalid MAX_SPORES '{}', using default", max_spores),
            }
        }

        config.data_path = non_empty_var("DATA_PATH");
        config.cert_path = non_empty_var("CERT_PATH");
        config.key_path = non_empty_var("KEY_PATH");

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.metrics_port == self.port {
            return Err(ConfigError::MetricsPortClash(self.metrics_port));
        }
        if self.max_spores == 0 {
            return Err(ConfigError::NoSpores);
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ConfigError::HalfTlsPair);
        }
        Ok(())
    }

    /// First existing of the configured data path, the container data
    /// directory, `./data` and the working directory
    pub fn data_dir(&self) -> PathBuf {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = &self.data_path {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from(DOCKER_DATA_DIR));
        candidates.push(PathBuf::from("./data"));
        candidates.push(PathBuf::from("."));

        coalesce_paths(&candidates).unwrap_or_else(|| PathBuf::from("."))
    }

    /// Certificate and key paths with Let's Encrypt layouts resolved
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((resolve_live_certs_path(cert), resolve_live_certs_path(key))),
            _ => None,
        }
    }
}

fn parse_port(var: &str) -> Option<u16> {
    let value = std::env::var(var).ok()?;
    match value.parse::<u16>() {
        Ok(parsed) if parsed > 0 => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} must be > 0, using default", var);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", var, value);
            None
        }
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Env file named by `--config <path>` (or `--config=<path>`), else `.env`
pub fn env_file_from_args<I, S>(args: I) -> PathBuf
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path.as_ref());
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_ENV_FILE)
}

/// First path that exists, logging each miss
pub fn coalesce_paths<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    for (i, candidate) in candidates.iter().enumerate() {
        let path = candidate.as_ref();
        if path.exists() {
            tracing::info!("File/folder found at {}", path.display());
            return Some(path.to_path_buf());
        }
        match candidates.get(i + 1) {
            Some(next) => tracing::info!(
                "File/folder not found at {} - going to try {}",
                path.display(),
                next.as_ref().display()
            ),
            None => tracing::info!("File/folder not found at {} - no more fallbacks to try", path.display()),
        }
    }
    None
}

/// For a path inside a Let's Encrypt `live/` directory, use it as given if it
/// exists, otherwise the same tail under the container certificate mount.
/// Other paths are returned unchanged.
pub fn resolve_live_certs_path(path: &str) -> PathBuf {
    let normalized = path.replace('\\', "/");
    let Some((_, tail)) = normalized.rsplit_once("/live/") else {
        return PathBuf::from(path);
    };

    let mounted = Path::new(DOCKER_CERTS_DIR).join("live").join(tail);
    coalesce_paths(&[PathBuf::from(path), mounted.clone()]).unwrap_or(mounted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.max_spores, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ServerConfig {
            metrics_port: 8080,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MetricsPortClash(8080)));

        let config = ServerConfig {
            cert_path: Some("cert.pem".into()),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::HalfTlsPair));

        let config = ServerConfig {
            max_spores: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoSpores));
    }

    #[test]
    fn test_env_file_from_args() {
        assert_eq!(env_file_from_args(["server"]), PathBuf::from(".env"));
        assert_eq!(
            env_file_from_args(["server", "--config", "prod.env"]),
            PathBuf::from("prod.env")
        );
        assert_eq!(
            env_file_from_args(["server", "--config=other.env"]),
            PathBuf::from("other.env")
        );
        // Dangling flag falls back to the default
        assert_eq!(env_file_from_args(["server", "--config"]), PathBuf::from(".env"));
    }

    #[test]
    fn test_coalesce_paths() {
        let found = coalesce_paths(&["/definitely/not/here", "."]);
        assert_eq!(found, Some(PathBuf::from(".")));
        assert_eq!(coalesce_paths(&["/definitely/not/here"]), None);
    }

    #[test]
    fn test_resolve_live_certs_path() {
        assert_eq!(resolve_live_certs_path("certs/cert.pem"), PathBuf::from("certs/cert.pem"));

        let resolved = resolve_live_certs_path("C:\\letsencrypt\\live\\example.com\\fullchain.pem");
        assert_eq!(
            resolved,
            PathBuf::from("/gameserver/certs/live/example.com/fullchain.pem")
        );
    }

    #[test]
    fn test_data_dir_falls_back() {
        let config = ServerConfig {
            data_path: Some("/definitely/not/here".into()),
            ..Default::default()
        };
        assert!(config.data_dir().exists());
    }
}
