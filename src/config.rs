use anyhow::{bail, Result};
use std::fmt;
use std::time::Duration;

use crate::deadline::IMAGE_CALL_LIMIT;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SESSION_IDLE_MINUTES: u64 = 60;

#[derive(Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_base: String,
    pub image_model: String,
    pub text_model: String,
    pub port: u16,
    /// Upper bound on a single image generation call.
    pub image_limit: Duration,
    /// Sessions untouched for this long are dropped from memory.
    pub session_idle_limit: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. `GEMINI_API_KEY` is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = match lookup("GEMINI_API_KEY") {
            Some(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => bail!("GEMINI_API_KEY environment variable not set"),
        };
        let api_base = lookup("GEMINI_API_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let image_model = lookup("GEMINI_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        let text_model = lookup("GEMINI_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string());
        let port = lookup("PORT").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);

        let image_limit = lookup("GEMINI_IMAGE_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(IMAGE_CALL_LIMIT);
        let idle_minutes = lookup("SESSION_IDLE_MINUTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SESSION_IDLE_MINUTES);
        let session_idle_limit = Duration::from_secs(idle_minutes * 60);

        Ok(Self { api_key, api_base, image_model, text_model, port, image_limit, session_idle_limit })
    }

    pub fn masked_api_key(&self) -> String {
        let visible: String = self.api_key.chars().take(4).collect();
        format!("{visible}***")
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &self.masked_api_key())
            .field("api_base", &self.api_base)
            .field("image_model", &self.image_model)
            .field("text_model", &self.text_model)
            .field("port", &self.port)
            .field("image_limit", &self.image_limit)
            .field("session_idle_limit", &self.session_idle_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
        assert!(AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let config = AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "abcdef123")])).unwrap();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.image_limit, IMAGE_CALL_LIMIT);
        assert_eq!(config.session_idle_limit, Duration::from_secs(3600));
    }

    #[test]
    fn overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "abcdef123"),
            ("GEMINI_API_BASE", "http://localhost:9000/v1beta/"),
            ("PORT", "3000"),
            ("GEMINI_IMAGE_TIMEOUT_SECS", "90"),
            ("SESSION_IDLE_MINUTES", "5"),
        ]))
        .unwrap();
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");
        assert_eq!(config.port, 3000);
        assert_eq!(config.image_limit, Duration::from_secs(90));
        assert_eq!(config.session_idle_limit, Duration::from_secs(300));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let config = AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "abcdef123")])).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("abcd***"));
        assert!(!debug.contains("abcdef123"));
    }
}
