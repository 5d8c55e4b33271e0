//! HTTP client for the vault server's `/api/v1` API.
//!
//! Implements the four calls of a run: login, vault listing, the filtered
//! entry query and the entry detail read. One `reqwest::Client` is built per
//! run and reused for every call.
//!
//! **Never** puts raw response bodies into errors: the entry detail body
//! contains the plaintext password.

use reqwest::header::HeaderValue;
use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::secret::{SecretValue, SessionToken};
use crate::wire::{
    self, EntryDetail, EntryList, Envelope, LoginRequest, LoginResponse, VaultSummary,
};

/// Vault server API errors. Raw API responses are never exposed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),

    #[error("network error communicating with vault server")]
    Network(#[source] reqwest::Error),

    #[error("request to vault server timed out")]
    Timeout,

    #[error("vault server rejected the credentials")]
    Unauthorized(u16),

    #[error("not found: {what}")]
    NotFound { what: String, status: Option<u16> },

    #[error("vault server error")]
    ServerError(u16),

    #[error("unexpected vault server response: status {0}")]
    UnexpectedStatus(u16),

    #[error("malformed response body from vault server")]
    Decode(#[source] reqwest::Error),

    #[error("response is missing field '{0}'")]
    MissingField(&'static str),

    #[error("session token is not a valid header value")]
    InvalidToken,
}

impl ApiError {
    /// HTTP status that caused the error, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(s) | Self::ServerError(s) | Self::UnexpectedStatus(s) => Some(*s),
            Self::NotFound { status, .. } => *status,
            Self::Network(e) | Self::Decode(e) => e.status().map(|s| s.as_u16()),
            Self::Build(_) | Self::Timeout | Self::MissingField(_) | Self::InvalidToken => None,
        }
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(err)
    }
}

/// Map the status of `resp` and decode its JSON body on success.
///
/// `what` names the resource for not-found messages.
async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, ApiError> {
    match resp.status().as_u16() {
        200..=299 => resp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Decode(e)
            }
        }),
        s @ (401 | 403) => Err(ApiError::Unauthorized(s)),
        404 => Err(ApiError::NotFound {
            what: what.to_owned(),
            status: Some(404),
        }),
        s @ 500..=599 => Err(ApiError::ServerError(s)),
        other => Err(ApiError::UnexpectedStatus(other)),
    }
}

/// Vault server REST API client.
///
/// No stored token: the session token is passed per call and never outlives
/// the run that obtained it.
#[derive(Debug, Clone)]
pub struct VaultServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl VaultServerClient {
    /// Build the user-agent string from the crate version.
    fn user_agent() -> String {
        format!("vaultpull/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Create a client for `base_url` (validated, without trailing slash).
    pub fn new(base_url: &str, config: &ClientConfig) -> Result<Self, ApiError> {
        if config.insecure_skip_tls_verify {
            warn!(
                server = base_url,
                "TLS certificate verification is DISABLED for this run"
            );
        }

        let http = reqwest::Client::builder()
            .user_agent(Self::user_agent())
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(ApiError::Build)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn token_header(token: &SessionToken) -> Result<HeaderValue, ApiError> {
        let mut value =
            HeaderValue::from_str(token.expose()).map_err(|_| ApiError::InvalidToken)?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Exchange the application key/secret for a session token.
    pub async fn login(&self, app_key: &str, app_secret: &str) -> Result<SessionToken, ApiError> {
        let resp = self
            .http
            .post(self.url(wire::LOGIN_PATH))
            .json(&LoginRequest {
                app_key,
                app_secret,
            })
            .send()
            .await
            .map_err(transport)?;

        let body: LoginResponse = decode(resp, "login endpoint").await?;
        let token = body.into_token().ok_or(ApiError::MissingField("tokenId"))?;
        debug!("login succeeded");
        Ok(SessionToken::new(token))
    }

    /// List all vaults visible to the session, in server order.
    pub async fn list_vaults(&self, token: &SessionToken) -> Result<Vec<VaultSummary>, ApiError> {
        let resp = self
            .http
            .get(self.url(wire::VAULTS_PATH))
            .header(wire::TOKEN_HEADER, Self::token_header(token)?)
            .send()
            .await
            .map_err(transport)?;

        let body: Envelope<Vec<VaultSummary>> = decode(resp, "vaults endpoint").await?;
        Ok(body.data)
    }

    /// Resolve a vault name to its ID. Exact, case-sensitive match; the first
    /// match in server order wins. `Ok(None)` when nothing matches.
    pub async fn find_vault_by_name(
        &self,
        token: &SessionToken,
        name: &str,
    ) -> Result<Option<String>, ApiError> {
        let vaults = self.list_vaults(token).await?;
        debug!(count = vaults.len(), "listed vaults");
        Ok(vaults.into_iter().find(|v| v.name == name).map(|v| v.id))
    }

    /// Resolve an entry name to its ID within a vault.
    ///
    /// The server applies the `name` filter; the first returned entry is
    /// trusted as-is. An empty result is `NotFound`.
    pub async fn find_entry_by_name(
        &self,
        token: &SessionToken,
        vault_id: &str,
        name: &str,
    ) -> Result<String, ApiError> {
        let resp = self
            .http
            .get(self.url(&wire::entries_path(vault_id)))
            .header(wire::TOKEN_HEADER, Self::token_header(token)?)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(transport)?;

        let body: Envelope<Option<EntryList>> = decode(resp, "entries endpoint").await?;
        body.data
            .and_then(EntryList::first_id)
            .ok_or_else(|| ApiError::NotFound {
                what: format!("entry '{name}'"),
                status: None,
            })
    }

    /// Fetch the decrypted password of an entry.
    pub async fn get_entry_password(
        &self,
        token: &SessionToken,
        vault_id: &str,
        entry_id: &str,
    ) -> Result<SecretValue, ApiError> {
        let resp = self
            .http
            .get(self.url(&wire::entry_path(vault_id, entry_id)))
            .header(wire::TOKEN_HEADER, Self::token_header(token)?)
            .query(&[("includeSensitiveData", "true")])
            .send()
            .await
            .map_err(transport)?;

        let body: Envelope<EntryDetail> = decode(resp, "entry").await?;
        body.data
            .into_password()
            .map(SecretValue::new)
            .ok_or(ApiError::MissingField("password"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
