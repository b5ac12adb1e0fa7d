use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::EngineSettings;
use crate::limits::*;

/// Process configuration, read from `CAMPO_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub horizon_months: u32,
    pub pricing_cache_ttl_secs: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "campo".into(),
            max_connections: 256,
            compact_threshold: 1000,
            horizon_months: DEFAULT_HORIZON_MONTHS,
            pricing_cache_ttl_secs: (DEFAULT_PRICING_TTL_MS / 1000) as u64,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parsed<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable numbers fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: get("CAMPO_BIND").unwrap_or(d.bind),
            port: parsed(get("CAMPO_PORT"), d.port),
            data_dir: get("CAMPO_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("CAMPO_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(get("CAMPO_MAX_CONNECTIONS"), d.max_connections),
            compact_threshold: parsed(get("CAMPO_COMPACT_THRESHOLD"), d.compact_threshold),
            horizon_months: parsed(get("CAMPO_HORIZON_MONTHS"), d.horizon_months)
                .clamp(1, MAX_HORIZON_MONTHS),
            pricing_cache_ttl_secs: parsed(
                get("CAMPO_PRICING_CACHE_TTL_SECS"),
                d.pricing_cache_ttl_secs,
            ),
            metrics_port: get("CAMPO_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: get("CAMPO_TLS_CERT"),
            tls_key: get("CAMPO_TLS_KEY"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("campo.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            horizon_months: self.horizon_months,
            pricing_cache_ttl_ms: i64::try_from(self.pricing_cache_ttl_secs.saturating_mul(1000))
                .unwrap_or(i64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = from(&[]);
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.horizon_months, 3);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/campo.wal"));
        assert_eq!(cfg.engine_settings().pricing_cache_ttl_ms, 300_000);
        assert!(cfg.metrics_port.is_none());
    }

    #[test]
    fn overrides_and_fallbacks() {
        let cfg = from(&[
            ("CAMPO_PORT", "6000"),
            ("CAMPO_DATA_DIR", "/var/lib/campo"),
            ("CAMPO_MAX_CONNECTIONS", "lots"),
            ("CAMPO_HORIZON_MONTHS", "99"),
            ("CAMPO_PRICING_CACHE_TTL_SECS", "5"),
        ]);
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/campo/campo.wal"));
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.horizon_months, MAX_HORIZON_MONTHS);
        assert_eq!(cfg.engine_settings().pricing_cache_ttl_ms, 5_000);
    }
}
