use serde::{Deserialize, Serialize};

/// Top-level local configuration for the client process. This is distinct
/// from `StreamingOptions` (§6): it holds process-level settings the core
/// needs to boot (API base URL, ICE overrides, logging), not per-session
/// streaming parameters, which the excluded settings collaborator owns.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GfnClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ice: IceConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the GFN session API (§6): `POST {base}/session`, etc.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// HTTP request timeout in milliseconds, applied per attempt (retries in
    /// SessionController layer on top of this).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// ICE/STUN/TURN overrides. The server-issued ICE server list (§4.4) always
/// takes precedence; these exist only as a fallback/override for local
/// testing and restrictive networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,
    #[serde(default)]
    pub turn_urls: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to an additional trusted root, appended to the native root
    /// store (mirrors the teacher's pinned-cert signaling TLS connector).
    pub root_cert_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: default_api_base_url(), request_timeout_ms: default_request_timeout_ms() }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: default_stun_urls(),
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl GfnClientConfig {
    /// Validate the configuration, returning every issue found rather than
    /// failing on the first one (mirrors the teacher's `BeamConfig::validate`).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if !self.api.base_url.starts_with("https://") {
            issues.push(format!(
                "ERROR: api.base_url '{}' must start with https://.",
                self.api.base_url
            ));
        }
        if self.api.request_timeout_ms == 0 {
            issues.push("ERROR: api.request_timeout_ms must be > 0.".to_string());
        }

        for url in &self.ice.stun_urls {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                issues.push(format!(
                    "ERROR: STUN URL '{url}' must start with 'stun:' or 'stuns:'."
                ));
            }
        }
        for url in &self.ice.turn_urls {
            if !url.starts_with("turn:") && !url.starts_with("turns:") {
                issues.push(format!(
                    "ERROR: TURN URL '{url}' must start with 'turn:' or 'turns:'."
                ));
            }
        }

        if let Some(path) = &self.tls.root_cert_override
            && !std::path::Path::new(path).exists()
        {
            issues.push(format!("ERROR: tls.root_cert_override '{path}' does not exist."));
        }

        const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            issues.push(format!(
                "WARNING: logging.level '{}' is not one of {:?}; tracing's EnvFilter will \
                 still accept it but it may not do what you expect.",
                self.logging.level, VALID_LEVELS
            ));
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

fn default_api_base_url() -> String {
    "https://session.geforcenow.com".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_stun_urls() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_from_empty_string() {
        let config: GfnClientConfig = toml::from_str("").expect("empty string deserializes");
        assert_eq!(config.api.base_url, "https://session.geforcenow.com");
        assert_eq!(config.api.request_timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ice.stun_urls.len(), 1);
        assert!(config.ice.turn_urls.is_empty());
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let toml_str = r#"
[api]
base_url = "https://custom.example.com"
"#;
        let config: GfnClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.base_url, "https://custom.example.com");
        assert_eq!(config.api.request_timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn validate_default_config_passes() {
        let config: GfnClientConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_https_base_url() {
        let mut config: GfnClientConfig = toml::from_str("").unwrap();
        config.api.base_url = "http://insecure.example.com".to_string();
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("base_url")));
    }

    #[test]
    fn validate_rejects_bad_stun_url_prefix() {
        let mut config: GfnClientConfig = toml::from_str("").unwrap();
        config.ice.stun_urls = vec!["http://stun.example.com".to_string()];
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("STUN URL")));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config: GfnClientConfig = toml::from_str("").unwrap();
        config.api.request_timeout_ms = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("request_timeout_ms")));
    }
}
