//! In-memory holders for the two sensitive values of a run: the session token
//! and the fetched password.
//!
//! Both are zeroed on drop, and their `Debug`/`Display` output is always
//! `[REDACTED]`. The plaintext is only reachable through `expose()`.

use std::fmt;

use zeroize::Zeroizing;

use crate::sanitize::REDACTED;

/// A decrypted secret that is zeroed from memory on drop.
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    /// Take ownership of `value` without copying it.
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Borrow the plaintext. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Opaque credential returned by login. Lives for a single run.
pub struct SessionToken(Zeroizing<String>);

impl SessionToken {
    pub fn new(token: String) -> Self {
        Self(Zeroizing::new(token))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&REDACTED).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
