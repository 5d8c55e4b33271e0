//! Core of the `vaultpull` CI step: log in to a vault server, resolve a vault
//! and an entry by name, and fetch the entry's decrypted password.
//!
//! The binary crate owns everything host-facing (inputs, masking, exporting).

pub mod client;
pub mod config;
pub mod pipeline;
pub mod sanitize;
pub mod secret;
pub mod wire;

pub use client::{ApiError, VaultServerClient};
pub use config::{ClientConfig, ConfigError, Inputs, RawInputs};
pub use pipeline::{Phase, Pipeline, PipelineError, Stage};
pub use secret::{SecretValue, SessionToken};

/// Output key under which the fetched password is published.
pub const PASSWORD_OUTPUT: &str = "password";
