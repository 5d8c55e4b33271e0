//! Request and response payloads of the vault server's `/api/v1` JSON API.
//!
//! Every payload type has exactly one extraction point here. The client never
//! pokes at raw `serde_json::Value`s, so a server-side shape change only
//! touches this module.

use serde::{Deserialize, Deserializer, Serialize};

pub const LOGIN_PATH: &str = "/api/v1/login";
pub const VAULTS_PATH: &str = "/api/v1/vault";

/// Header carrying the session token on every call after login.
pub const TOKEN_HEADER: &str = "tokenId";

/// `/api/v1/vault/{vaultId}/entry`
pub fn entries_path(vault_id: &str) -> String {
    format!("{VAULTS_PATH}/{}/entry", percent_encode_component(vault_id))
}

/// `/api/v1/vault/{vaultId}/entry/{entryId}`
pub fn entry_path(vault_id: &str, entry_id: &str) -> String {
    format!(
        "{}/{}",
        entries_path(vault_id),
        percent_encode_component(entry_id)
    )
}

/// Percent-encode a single URL path segment (RFC 3986 unreserved set kept).
fn percent_encode_component(input: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/login`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub app_key: &'a str,
    pub app_secret: &'a str,
}

/// Response of `POST /api/v1/login`. Deliberately not `Debug`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    token_id: Option<String>,
}

impl LoginResponse {
    /// The session token, if the server sent a non-empty one.
    pub fn into_token(self) -> Option<String> {
        self.token_id.filter(|t| !t.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Vault and entry payloads
// ---------------------------------------------------------------------------

/// The `{ "data": ... }` wrapper around every `/api/v1/vault*` response.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VaultSummary {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EntrySummary {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of the filtered entry query.
///
/// Older servers answer with a single object under `data`, newer ones with an
/// array. Both are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EntryList {
    Many(Vec<EntrySummary>),
    One(EntrySummary),
}

impl EntryList {
    /// Identifier of the first entry in server order.
    pub fn first_id(self) -> Option<String> {
        match self {
            Self::Many(entries) => entries.into_iter().next().map(|e| e.id),
            Self::One(entry) => Some(entry.id),
        }
    }
}

/// Entry detail requested with `includeSensitiveData=true`. Not `Debug`, it
/// carries the plaintext password.
#[derive(Deserialize)]
pub struct EntryDetail {
    #[serde(default)]
    password: Option<String>,
}

impl EntryDetail {
    /// The decrypted password; an empty string counts as absent.
    pub fn into_password(self) -> Option<String> {
        self.password.filter(|p| !p.is_empty())
    }
}

/// Identifiers are strings on current servers but plain numbers on some
/// older deployments.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(n) => n.to_string(),
    })
}
