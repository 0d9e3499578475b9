/// Runtime configuration read from the environment (and `.env`).
use std::{net::IpAddr, time::Duration};

use crate::ConfigError;

/// Whether service wrappers call the real backend or answer with simulated data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceMode {
    Live,
    Mock { delay: Duration },
}

impl ServiceMode {
    pub fn is_mock(&self) -> bool {
        matches!(self, ServiceMode::Mock { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceMode::Live => "live",
            ServiceMode::Mock { .. } => "mock",
        }
    }

    /// Waits the simulated network latency, scaled by `factor`.
    pub(crate) async fn simulate_latency(&self, factor: u32) {
        if let ServiceMode::Mock { delay } = self {
            if !delay.is_zero() {
                tokio::time::sleep(*delay * factor).await;
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: Option<String>,
    pub upload_preset: String,
    pub folder: String,
}

impl CloudinaryConfig {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.cloud_name.trim().is_empty() {
            missing.push("cloud_name");
        }
        if self.upload_preset.trim().is_empty() {
            missing.push("upload_preset");
        }
        missing
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub static_dir: String,
    pub api_url: String,
    pub mode: ServiceMode,
    pub cache_ttl: Duration,
    pub id_mapping: bool,
    pub cloudinary: CloudinaryConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind = match get("SPORTMAP_BIND") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "SPORTMAP_BIND",
                value,
            })?,
            None => IpAddr::from([127, 0, 0, 1]),
        };
        let port = parse_or("PORT", get("PORT"), 3000u16)?;
        let api_url = get("SPORTMAP_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_default();

        let delay = Duration::from_millis(parse_or(
            "SPORTMAP_MOCK_DELAY_MS",
            get("SPORTMAP_MOCK_DELAY_MS"),
            1000u64,
        )?);
        let mode = match get("SPORTMAP_MODE").as_deref() {
            Some("live") => ServiceMode::Live,
            Some("mock") => ServiceMode::Mock { delay },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SPORTMAP_MODE",
                    value: other.to_string(),
                });
            }
            None if api_url.is_empty() => ServiceMode::Mock { delay },
            None => ServiceMode::Live,
        };

        let cloudinary = CloudinaryConfig {
            cloud_name: get("CLOUDINARY_CLOUD_NAME").unwrap_or_default(),
            api_key: get("CLOUDINARY_API_KEY"),
            upload_preset: get("CLOUDINARY_UPLOAD_PRESET").unwrap_or_default(),
            folder: "sportmap/reports".to_string(),
        };

        if mode == ServiceMode::Live {
            if api_url.is_empty() {
                return Err(ConfigError::MissingApiUrl);
            }
            let missing = cloudinary.missing_fields();
            if !missing.is_empty() {
                return Err(ConfigError::MissingCloudinary(missing));
            }
        }

        Ok(Self {
            bind,
            port,
            static_dir: get("SPORTMAP_STATIC_DIR").unwrap_or_else(|| "public".to_string()),
            api_url,
            mode,
            cache_ttl: Duration::from_secs(parse_or(
                "SPORTMAP_CACHE_TTL_SECS",
                get("SPORTMAP_CACHE_TTL_SECS"),
                600u64,
            )?),
            id_mapping: parse_or("SPORTMAP_ID_MAPPING", get("SPORTMAP_ID_MAPPING"), false)?,
            cloudinary,
        })
    }

    /// Mock configuration with no latency, used by tests and local demos.
    pub fn mock() -> Self {
        Self {
            bind: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            static_dir: "public".to_string(),
            api_url: String::new(),
            mode: ServiceMode::Mock {
                delay: Duration::ZERO,
            },
            cache_ttl: Duration::from_secs(600),
            id_mapping: false,
            cloudinary: CloudinaryConfig {
                cloud_name: "demo".to_string(),
                api_key: None,
                upload_preset: "sportmap_unsigned".to_string(),
                folder: "sportmap/reports".to_string(),
            },
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_mock_without_api_url() {
        let config = config_from(&[]).unwrap();
        assert!(config.mode.is_mock());
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_ttl, Duration::from_secs(600));
    }

    #[test]
    fn live_mode_requires_cloudinary_settings() {
        let err = config_from(&[("SPORTMAP_API_URL", "https://api.example.org/")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCloudinary(ref fields) if fields.len() == 2));

        let config = config_from(&[
            ("SPORTMAP_API_URL", "https://api.example.org/"),
            ("CLOUDINARY_CLOUD_NAME", "sportmap"),
            ("CLOUDINARY_UPLOAD_PRESET", "reports"),
        ])
        .unwrap();
        assert_eq!(config.mode, ServiceMode::Live);
        assert_eq!(config.api_url, "https://api.example.org");
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = config_from(&[("SPORTMAP_MODE", "staging")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SPORTMAP_MODE", .. }));
    }

    #[test]
    fn explicit_mock_keeps_api_url() {
        let config = config_from(&[
            ("SPORTMAP_MODE", "mock"),
            ("SPORTMAP_API_URL", "https://api.example.org"),
            ("SPORTMAP_MOCK_DELAY_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.mode, ServiceMode::Mock { delay: Duration::ZERO });
    }
}
