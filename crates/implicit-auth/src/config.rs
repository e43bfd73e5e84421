//! Client configuration loading and normalization
//!
//! Precedence: env vars > config file > defaults. A missing client id is the
//! only fatal construction error in the crate; everything else either has a
//! default or is derived from the page location at normalization time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::constants::{
    CLIENT_ID_ENV, CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE, DEFAULT_INSTANCE,
    DEFAULT_LOAD_FRAME_TIMEOUT_MS, DEFAULT_TENANT,
};

/// Implicit-flow client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// Resource requested for the client's own identity token. Defaults to the client id.
    #[serde(default)]
    pub login_resource: Option<String>,
    /// Defaults to the current location without query or fragment.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
    /// Log in through a popup window instead of a full-page redirect.
    #[serde(default)]
    pub popup: bool,
    #[serde(default = "default_load_frame_timeout_ms")]
    pub load_frame_timeout_ms: u64,
    /// Raw `key=value` pairs appended to every authorize URL.
    #[serde(default)]
    pub extra_query_parameter: Option<String>,
    #[serde(default)]
    pub anonymous_endpoints: Vec<String>,
}

fn default_instance() -> String {
    DEFAULT_INSTANCE.to_string()
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_load_frame_timeout_ms() -> u64 {
    DEFAULT_LOAD_FRAME_TIMEOUT_MS
}

impl AuthConfig {
    /// Configuration with defaults for everything but the client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            instance: default_instance(),
            tenant: default_tenant(),
            login_resource: None,
            redirect_uri: None,
            post_logout_redirect_uri: None,
            popup: false,
            load_frame_timeout_ms: default_load_frame_timeout_ms(),
            extra_query_parameter: None,
            anonymous_endpoints: Vec::new(),
        }
    }

    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// The returned config is not yet normalized; see [`AuthConfig::normalize`].
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AuthConfig = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var(CLIENT_ID_ENV) {
            config.client_id = client_id;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolve config file path from CLI arg or `IMPLICIT_AUTH_CONFIG` env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Reject configurations no context can be built from.
    pub fn validate(&self) -> common::Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id is required".into()));
        }

        if !self.instance.starts_with("https://") && !self.instance.starts_with("http://") {
            return Err(common::Error::Config(format!(
                "instance must start with http:// or https://, got: {}",
                self.instance
            )));
        }

        if self.load_frame_timeout_ms == 0 {
            return Err(common::Error::Config(
                "load_frame_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Validate and fill every derived default.
    ///
    /// `current_location` is the page URL the client runs on; redirect URIs
    /// default to it with query and fragment stripped, since authorities reject
    /// redirect URIs carrying either.
    pub fn normalize(mut self, current_location: &str) -> common::Result<Self> {
        self.validate()?;

        self.client_id = self.client_id.trim().to_string();
        if !self.instance.ends_with('/') {
            self.instance.push('/');
        }
        if self.login_resource.is_none() {
            self.login_resource = Some(self.client_id.clone());
        }
        let location = strip_query_and_fragment(current_location);
        if self.redirect_uri.is_none() {
            self.redirect_uri = Some(location.to_string());
        }
        if self.post_logout_redirect_uri.is_none() {
            self.post_logout_redirect_uri = Some(location.to_string());
        }

        Ok(self)
    }

    pub fn login_resource(&self) -> &str {
        self.login_resource.as_deref().unwrap_or(&self.client_id)
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uri.as_deref().unwrap_or_default()
    }

    pub fn load_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.load_frame_timeout_ms)
    }

    /// Whether requests to `url` go out without a token.
    pub fn is_anonymous_endpoint(&self, url: &str) -> bool {
        self.anonymous_endpoints
            .iter()
            .any(|endpoint| url.contains(endpoint.as_str()))
    }

    /// Stable identity of this configuration.
    ///
    /// Two configs with the same fingerprint share one authentication context.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let fields = [
            self.client_id.as_str(),
            self.instance.as_str(),
            self.tenant.as_str(),
            self.login_resource(),
            self.redirect_uri(),
            self.post_logout_redirect_uri.as_deref().unwrap_or_default(),
            if self.popup { "popup" } else { "redirect" },
            self.extra_query_parameter.as_deref().unwrap_or_default(),
        ];
        for field in fields {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.load_frame_timeout_ms.to_be_bytes());
        for endpoint in &self.anonymous_endpoints {
            hasher.update(endpoint.as_bytes());
            hasher.update([0u8]);
        }
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// `https://app/page?x=1#frag` -> `https://app/page`
fn strip_query_and_fragment(location: &str) -> &str {
    let end = location.find(['?', '#']).unwrap_or(location.len());
    &location[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("implicit-auth.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CLIENT_ID_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"client_id = "app-123""#);

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.client_id, "app-123");
        assert_eq!(config.instance, DEFAULT_INSTANCE);
        assert_eq!(config.tenant, "common");
        assert_eq!(config.load_frame_timeout_ms, 6000);
        assert!(!config.popup);
        assert!(config.anonymous_endpoints.is_empty());
    }

    #[test]
    fn load_reads_all_fields() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CLIENT_ID_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
client_id = "app-123"
instance = "https://login.example.com/"
tenant = "contoso"
login_resource = "https://api.example.com"
redirect_uri = "https://app.example.com/callback"
popup = true
load_frame_timeout_ms = 10000
extra_query_parameter = "domain_hint=example.com"
anonymous_endpoints = ["/public"]
"#,
        );

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.tenant, "contoso");
        assert_eq!(config.login_resource(), "https://api.example.com");
        assert_eq!(config.redirect_uri(), "https://app.example.com/callback");
        assert!(config.popup);
        assert_eq!(config.load_frame_timeout(), Duration::from_secs(10));
        assert!(config.is_anonymous_endpoint("https://app.example.com/public/info"));
        assert!(!config.is_anonymous_endpoint("https://app.example.com/private"));
    }

    #[test]
    fn missing_client_id_is_fatal() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CLIENT_ID_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"tenant = "contoso""#);

        let err = AuthConfig::load(&path).unwrap_err();
        assert!(
            err.to_string().contains("client_id is required"),
            "got: {err}"
        );
    }

    #[test]
    fn client_id_from_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"client_id = "from-file""#);

        unsafe { set_env(CLIENT_ID_ENV, "from-env") };
        let config = AuthConfig::load(&path).unwrap();
        unsafe { remove_env(CLIENT_ID_ENV) };

        assert_eq!(config.client_id, "from-env");
    }

    #[test]
    fn load_missing_file_errors() {
        let result = AuthConfig::load(Path::new("/nonexistent/implicit-auth.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn load_invalid_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "client_id = {{{{");
        let result = AuthConfig::load(&path);
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn zero_frame_timeout_rejected() {
        let mut config = AuthConfig::new("app");
        config.load_frame_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn instance_without_scheme_rejected() {
        let mut config = AuthConfig::new("app");
        config.instance = "login.example.com/".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("instance must start with http"));
    }

    #[test]
    fn normalize_fills_derived_defaults() {
        let mut config = AuthConfig::new("app-123");
        config.instance = "https://login.example.com".into();
        let config = config
            .normalize("https://app.example.com/page?tab=1#/route")
            .unwrap();

        assert_eq!(config.instance, "https://login.example.com/");
        assert_eq!(config.login_resource(), "app-123");
        assert_eq!(config.redirect_uri(), "https://app.example.com/page");
        assert_eq!(
            config.post_logout_redirect_uri.as_deref(),
            Some("https://app.example.com/page")
        );
    }

    #[test]
    fn normalize_keeps_explicit_redirect_uri() {
        let mut config = AuthConfig::new("app-123");
        config.redirect_uri = Some("https://app.example.com/cb".into());
        let config = config.normalize("https://app.example.com/other").unwrap();
        assert_eq!(config.redirect_uri(), "https://app.example.com/cb");
    }

    #[test]
    fn fingerprint_tracks_configuration_identity() {
        let a = AuthConfig::new("app").normalize("https://a.example/").unwrap();
        let b = AuthConfig::new("app").normalize("https://a.example/").unwrap();
        let c = AuthConfig::new("other").normalize("https://a.example/").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env(CONFIG_PATH_ENV, "/env/auth.toml") };
        assert_eq!(
            AuthConfig::resolve_path(Some("/cli/auth.toml")),
            PathBuf::from("/cli/auth.toml"),
            "CLI arg must take precedence over the env var"
        );
        assert_eq!(
            AuthConfig::resolve_path(None),
            PathBuf::from("/env/auth.toml")
        );
        unsafe { remove_env(CONFIG_PATH_ENV) };
        assert_eq!(
            AuthConfig::resolve_path(None),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
    }
}
