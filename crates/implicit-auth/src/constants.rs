//! Wire parameter names, durable storage keys and configuration defaults
//!
//! Storage keys keep the names used by existing browser sessions so a page
//! upgraded mid-flow can still match a login that was started before the
//! reload.

/// Response fragment parameter carrying the correlation token.
pub const STATE: &str = "state";

/// Response fragment parameter carrying the error code.
pub const ERROR: &str = "error";

/// Response fragment parameter carrying the human readable error.
pub const ERROR_DESCRIPTION: &str = "error_description";

/// Response fragment parameter carrying an access token.
pub const ACCESS_TOKEN: &str = "access_token";

/// Response fragment parameter carrying an identity token.
pub const ID_TOKEN: &str = "id_token";

/// Parameters whose presence marks a fragment as an authorization response.
pub const AUTH_RESPONSE_KEYS: &[&str] = &[ERROR_DESCRIPTION, ERROR, ACCESS_TOKEN, ID_TOKEN];

/// Durable storage keys.
pub mod storage {
    /// Correlation token of the outstanding redirect login.
    pub const STATE_LOGIN: &str = "adal.state.login";
    /// Replay nonce expected inside the returned identity token.
    pub const NONCE_IDTOKEN: &str = "adal.nonce.idtoken";
    /// Correlation token of the outstanding redirect token acquisition.
    pub const STATE_ACQUIRE_TOKEN: &str = "adal.state.acquireToken";
    /// Resource requested by the outstanding redirect token acquisition.
    pub const ACQUIRE_TOKEN_RESOURCE: &str = "adal.acquireToken.resource";
    /// Page the user was on when the login started.
    pub const LOGIN_REQUEST: &str = "adal.login.request";
    /// Error description of the last failed login.
    pub const LOGIN_ERROR: &str = "adal.login.error";
    /// Error code of the last auth response.
    pub const ERROR: &str = "adal.error";
    /// Error description of the last auth response.
    pub const ERROR_DESCRIPTION: &str = "adal.error.description";
}

/// Authority used when the configuration does not name one.
pub const DEFAULT_INSTANCE: &str = "https://login.microsoftonline.com/";

/// Tenant used when the configuration does not name one.
pub const DEFAULT_TENANT: &str = "common";

/// How long a hidden renewal frame may take before its entry is expired.
pub const DEFAULT_LOAD_FRAME_TIMEOUT_MS: u64 = 6000;

/// Config file name used when neither a CLI path nor the env var is set.
pub const DEFAULT_CONFIG_FILE: &str = "implicit-auth.toml";

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "IMPLICIT_AUTH_CONFIG";

/// Env var overriding the configured client id.
pub const CLIENT_ID_ENV: &str = "IMPLICIT_AUTH_CLIENT_ID";
