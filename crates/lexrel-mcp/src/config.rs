use std::str::FromStr;

pub const DEFAULT_DB_PATH: &str = "./data/lexrel-db.json";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "stdio" => Ok(Self::Stdio),
            other => Err(format!("unsupported transport: {other}")),
        }
    }
}

/// Start-up settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: String,
    pub transport: Transport,
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            transport: Transport::Stdio,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();
        let db_path = env_string(&lookup, "LEXREL_DB").unwrap_or(defaults.db_path);
        let transport = match env_string(&lookup, "LEXREL_TRANSPORT") {
            Some(raw) => raw.parse()?,
            None => defaults.transport,
        };
        let log_filter = env_string(&lookup, "LEXREL_LOG").unwrap_or(defaults.log_filter);
        Ok(Self {
            db_path,
            transport,
            log_filter,
        })
    }
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let cfg = ServerConfig::from_lookup(lookup(&[("LEXREL_DB", "  ")])).expect("config");
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.transport, Transport::Stdio);
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn overrides_are_read() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("LEXREL_DB", "/tmp/firm.json"),
            ("LEXREL_TRANSPORT", "STDIO"),
            ("LEXREL_LOG", "lexrel_core=debug"),
        ]))
        .expect("config");
        assert_eq!(cfg.db_path, "/tmp/firm.json");
        assert_eq!(cfg.log_filter, "lexrel_core=debug");
    }

    #[test]
    fn unknown_transport_is_an_error() {
        let err = ServerConfig::from_lookup(lookup(&[("LEXREL_TRANSPORT", "http")]));
        assert!(err.is_err());
    }
}
