use std::path::PathBuf;

use anyhow::{Context, bail};

use courier_core::feed::DEFAULT_FEED_CAPACITY;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
    "secret",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    pub public_url: String,
    pub feed_capacity: usize,
    pub notify_webhook: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COURIER_JWT_SECRET is unset or still a placeholder");
        }

        let host = var("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = match var("COURIER_PORT") {
            Some(p) => p.parse().with_context(|| format!("COURIER_PORT '{}' is not a port", p))?,
            None => 3000,
        };
        let feed_capacity = match var("COURIER_FEED_CAPACITY") {
            Some(c) => c
                .parse::<usize>()
                .ok()
                .filter(|c| *c > 0)
                .with_context(|| format!("COURIER_FEED_CAPACITY '{}' must be a positive integer", c))?,
            None => DEFAULT_FEED_CAPACITY,
        };
        let public_url = var("COURIER_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            db_path: var("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into()).into(),
            media_dir: var("COURIER_MEDIA_DIR").unwrap_or_else(|| "./media".into()).into(),
            notify_webhook: var("COURIER_NOTIFY_WEBHOOK"),
            host,
            port,
            jwt_secret,
            public_url,
            feed_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("COURIER_JWT_SECRET", "a-real-secret-value")]).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_path, PathBuf::from("courier.db"));
        assert_eq!(cfg.public_url, "http://0.0.0.0:3000");
        assert_eq!(cfg.feed_capacity, DEFAULT_FEED_CAPACITY);
        assert_eq!(cfg.notify_webhook, None);
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(config(&[]).is_err());
        assert!(config(&[("COURIER_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("COURIER_JWT_SECRET", "a-real-secret-value"),
            ("COURIER_PORT", "8080"),
            ("COURIER_PUBLIC_URL", "https://chat.example.com/"),
            ("COURIER_FEED_CAPACITY", "1024"),
            ("COURIER_NOTIFY_WEBHOOK", "https://hooks.example.com/push"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.public_url, "https://chat.example.com");
        assert_eq!(cfg.feed_capacity, 1024);
        assert_eq!(cfg.notify_webhook.as_deref(), Some("https://hooks.example.com/push"));

        assert!(config(&[("COURIER_JWT_SECRET", "a-real-secret-value"), ("COURIER_PORT", "http")]).is_err());
        assert!(config(&[("COURIER_JWT_SECRET", "a-real-secret-value"), ("COURIER_FEED_CAPACITY", "0")]).is_err());
    }
}
