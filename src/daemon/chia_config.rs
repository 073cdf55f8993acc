use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Subset of the node's `config/config.yaml` needed to reach the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct ChiaConfig {
    pub self_hostname: String,
    pub daemon_port: u16,
    pub daemon_ssl: DaemonSsl,

    #[serde(skip)]
    directory: PathBuf,
}

/// Daemon client certificate paths, relative to the config directory.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSsl {
    pub private_crt: String,
    pub private_key: String,
}

/// Address and client identity used to open the daemon connection.
#[derive(Clone)]
pub struct DaemonEndpoint {
    pub address: String,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for DaemonEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonEndpoint")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ChiaConfig {
    /// Load `<directory>/config/config.yaml`.
    pub fn load(directory: &Path) -> Result<Self> {
        let path = Self::config_file_path(directory);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading chia config {}", path.display()))?;

        let mut cfg: ChiaConfig = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing chia config {}", path.display()))?;
        cfg.directory = directory.to_path_buf();

        Ok(cfg)
    }

    pub fn config_file_path(directory: &Path) -> PathBuf {
        directory.join("config").join("config.yaml")
    }

    pub fn daemon_address(&self) -> String {
        format!("{}:{}", self.self_hostname, self.daemon_port)
    }

    pub fn daemon_cert_path(&self) -> PathBuf {
        self.directory.join(&self.daemon_ssl.private_crt)
    }

    pub fn daemon_key_path(&self) -> PathBuf {
        self.directory.join(&self.daemon_ssl.private_key)
    }

    /// Resolve the daemon endpoint, preferring `address_override` when set.
    pub fn daemon_endpoint(&self, address_override: Option<&str>) -> Result<DaemonEndpoint> {
        let cert_path = self.daemon_cert_path();
        let key_path = self.daemon_key_path();

        let cert_pem = std::fs::read(&cert_path)
            .with_context(|| format!("reading daemon cert {}", cert_path.display()))?;
        let key_pem = std::fs::read(&key_path)
            .with_context(|| format!("reading daemon key {}", key_path.display()))?;

        let address = address_override
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.daemon_address());

        Ok(DaemonEndpoint {
            address,
            cert_pem,
            key_pem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
self_hostname: localhost
daemon_port: 55400
daemon_ssl:
  private_crt: config/ssl/daemon/private_daemon.crt
  private_key: config/ssl/daemon/private_daemon.key
full_node:
  port: 8444
"#;

    fn write_fixture(dir: &Path) {
        let config_dir = dir.join("config");
        let ssl_dir = config_dir.join("ssl").join("daemon");
        std::fs::create_dir_all(&ssl_dir).unwrap();
        std::fs::write(config_dir.join("config.yaml"), CONFIG).unwrap();
        std::fs::write(ssl_dir.join("private_daemon.crt"), "CERT").unwrap();
        std::fs::write(ssl_dir.join("private_daemon.key"), "KEY").unwrap();
    }

    #[test]
    fn test_load_and_resolve_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let cfg = ChiaConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.daemon_address(), "localhost:55400");

        let endpoint = cfg.daemon_endpoint(None).unwrap();
        assert_eq!(endpoint.address, "localhost:55400");
        assert_eq!(endpoint.cert_pem, b"CERT");
        assert_eq!(endpoint.key_pem, b"KEY");
    }

    #[test]
    fn test_address_override() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let cfg = ChiaConfig::load(dir.path()).unwrap();
        let endpoint = cfg.daemon_endpoint(Some("10.0.0.5:55400")).unwrap();
        assert_eq!(endpoint.address, "10.0.0.5:55400");

        let endpoint = cfg.daemon_endpoint(Some("")).unwrap();
        assert_eq!(endpoint.address, "localhost:55400");
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChiaConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("reading chia config"));
    }
}
