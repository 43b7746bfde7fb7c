use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `TIDYSLOT_*` environment variables.
/// Numeric values that do not parse fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "tidyslot".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parsed<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| s.trim().parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("TIDYSLOT_BIND").unwrap_or(defaults.bind),
            port: parsed(lookup("TIDYSLOT_PORT")).unwrap_or(defaults.port),
            data_dir: lookup("TIDYSLOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("TIDYSLOT_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(lookup("TIDYSLOT_MAX_CONNECTIONS"))
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(lookup("TIDYSLOT_COMPACT_THRESHOLD"))
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(lookup("TIDYSLOT_METRICS_PORT")),
            tls_cert: lookup("TIDYSLOT_TLS_CERT"),
            tls_key: lookup("TIDYSLOT_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("TIDYSLOT_BIND", "127.0.0.1"),
            ("TIDYSLOT_PORT", "6000"),
            ("TIDYSLOT_DATA_DIR", "/var/lib/tidyslot"),
            ("TIDYSLOT_MAX_CONNECTIONS", "8"),
            ("TIDYSLOT_COMPACT_THRESHOLD", "50"),
            ("TIDYSLOT_METRICS_PORT", "9100"),
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/tidyslot"));
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let config = config_from(&[
            ("TIDYSLOT_PORT", "not-a-port"),
            ("TIDYSLOT_MAX_CONNECTIONS", "-3"),
            ("TIDYSLOT_METRICS_PORT", "70000"),
        ]);
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, None);
    }
}
