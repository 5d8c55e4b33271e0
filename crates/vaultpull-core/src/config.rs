//! Step inputs: the raw, possibly partial values gathered from the host, and
//! the validated [`Inputs`] a pipeline runs with.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::secret::SecretValue;

/// Per-call HTTP timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by input validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required input '{0}'")]
    Missing(&'static str),

    #[error("insecure HTTP URL rejected: {0} (http:// is permitted for localhost/127.0.0.1 only)")]
    InsecureUrl(String),

    #[error("unsupported URL scheme: {0} (expected https://)")]
    UnsupportedScheme(String),

    #[error("server URL has no host: {0}")]
    MissingHost(String),

    #[error("'{0}' is not a valid environment variable name")]
    InvalidVariableName(String),

    #[error("input '{0}' contains control characters")]
    InvalidCharset(&'static str),

    #[error("timeout must be at least one second")]
    ZeroTimeout,

    #[error("input 'timeout_secs' must be a whole number of seconds, got '{0}'")]
    InvalidTimeout(String),

    #[error("input '{input}' must be a boolean (true/false), got '{value}'")]
    InvalidBool { input: &'static str, value: String },
}

/// HTTP transport settings shared by every call of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Applied to each request individually.
    pub timeout: Duration,
    /// Accept any server certificate. Off unless explicitly requested.
    pub insecure_skip_tls_verify: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            insecure_skip_tls_verify: false,
        }
    }
}

/// Unvalidated inputs, as read from flags, env vars or a TOML file.
///
/// Every field is optional so that several sources can be layered with
/// [`RawInputs::or`] before validation. Runner inputs are always strings, so
/// the numeric and boolean inputs are kept as text here and parsed in
/// [`Inputs::from_raw`]; a blank value then counts as unset like any other.
#[derive(Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawInputs {
    pub server_url: Option<String>,
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub vault_name: Option<String>,
    pub entry_name: Option<String>,
    pub output_variable: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub timeout_secs: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub insecure_skip_tls_verify: Option<String>,
}

/// TOML files may spell these as `10` / `true` rather than strings.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Bool(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Str(s) => s,
        Scalar::Int(n) => n.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

impl RawInputs {
    /// Fill every unset (or blank) field of `self` from `fallback`.
    pub fn or(self, fallback: RawInputs) -> RawInputs {
        fn pick(primary: Option<String>, fallback: Option<String>) -> Option<String> {
            primary.filter(|v| !v.trim().is_empty()).or(fallback)
        }

        RawInputs {
            server_url: pick(self.server_url, fallback.server_url),
            app_key: pick(self.app_key, fallback.app_key),
            app_secret: pick(self.app_secret, fallback.app_secret),
            vault_name: pick(self.vault_name, fallback.vault_name),
            entry_name: pick(self.entry_name, fallback.entry_name),
            output_variable: pick(self.output_variable, fallback.output_variable),
            timeout_secs: pick(self.timeout_secs, fallback.timeout_secs),
            insecure_skip_tls_verify: pick(
                self.insecure_skip_tls_verify,
                fallback.insecure_skip_tls_verify,
            ),
        }
    }
}

impl fmt::Debug for RawInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawInputs")
            .field("server_url", &self.server_url)
            .field("app_key", &self.app_key)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[REDACTED]"))
            .field("vault_name", &self.vault_name)
            .field("entry_name", &self.entry_name)
            .field("output_variable", &self.output_variable)
            .field("timeout_secs", &self.timeout_secs)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

/// Validated inputs for one run.
#[derive(Debug)]
pub struct Inputs {
    /// Base URL without trailing slash.
    pub server_url: String,
    pub app_key: String,
    pub app_secret: SecretValue,
    pub vault_name: String,
    pub entry_name: String,
    /// Name of the environment variable the password is exported as.
    pub output_variable: String,
    pub client: ClientConfig,
}

impl Inputs {
    /// Validate `raw`: all six inputs present, a safe server URL, names free
    /// of control characters and a usable variable name.
    pub fn from_raw(raw: RawInputs) -> Result<Self, ConfigError> {
        let server_url = validate_server_url(&required("server_url", raw.server_url)?)?;
        let app_key = required("app_key", raw.app_key)?;
        let app_secret = SecretValue::new(required_untrimmed("app_secret", raw.app_secret)?);
        let vault_name = validate_name("vault_name", required("vault_name", raw.vault_name)?)?;
        let entry_name = validate_name("entry_name", required("entry_name", raw.entry_name)?)?;
        let output_variable = required("output_variable", raw.output_variable)?;
        validate_variable_name(&output_variable)?;

        let timeout = parse_timeout(raw.timeout_secs)?;
        let insecure_skip_tls_verify =
            parse_bool("insecure_skip_tls_verify", raw.insecure_skip_tls_verify)?
                .unwrap_or(false);

        Ok(Self {
            server_url,
            app_key,
            app_secret,
            vault_name,
            entry_name,
            output_variable,
            client: ClientConfig {
                timeout,
                insecure_skip_tls_verify,
            },
        })
    }
}

/// Trimmed value of a required input; blank counts as missing.
fn required(name: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    required_untrimmed(name, value).map(|v| v.trim().to_owned())
}

/// Like [`required`], but keeps surrounding whitespace (it may be part of a secret).
fn required_untrimmed(name: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_timeout(value: Option<String>) -> Result<Duration, ConfigError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(DEFAULT_TIMEOUT);
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::ZeroTimeout),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(ConfigError::InvalidTimeout(value)),
    }
}

/// Same spellings the runner's own boolean inputs accept.
fn parse_bool(input: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "on" | "1" => Ok(Some(true)),
        "false" | "no" | "n" | "off" | "0" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool { input, value }),
    }
}

/// Accept `https://` URLs, and `http://` only for localhost/127.0.0.1.
fn validate_server_url(url: &str) -> Result<String, ConfigError> {
    let url = url.trim_end_matches('/');

    let (rest, secure) = if let Some(rest) = url.strip_prefix("https://") {
        (rest, true)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (rest, false)
    } else {
        return Err(ConfigError::UnsupportedScheme(url.to_owned()));
    };

    let host = rest.split('/').next().unwrap_or("");
    let host_no_port = host.split(':').next().unwrap_or("");
    if host_no_port.is_empty() {
        return Err(ConfigError::MissingHost(url.to_owned()));
    }
    if !secure && host_no_port != "localhost" && host_no_port != "127.0.0.1" {
        return Err(ConfigError::InsecureUrl(url.to_owned()));
    }

    Ok(url.to_owned())
}

fn validate_name(field: &'static str, value: String) -> Result<String, ConfigError> {
    if value.chars().any(char::is_control) {
        return Err(ConfigError::InvalidCharset(field));
    }
    Ok(value)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn validate_variable_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidVariableName(name.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
