//! Orchestration of a run: login, resolve vault, resolve entry, fetch secret.
//!
//! Stages run strictly in order, each one needing the identifier produced by
//! the previous stage. The first failure aborts the run; nothing obtained so
//! far (token, identifiers) is handed back to the caller.

use std::fmt;

use tracing::{debug, info, warn};

use crate::client::{ApiError, VaultServerClient};
use crate::config::Inputs;
use crate::sanitize::Scrubber;
use crate::secret::SecretValue;

/// Lifecycle of a [`Pipeline`].
///
/// `Idle → Authenticating → ResolvingVault → ResolvingEntry → FetchingSecret → Done`,
/// with any non-terminal phase able to jump to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Authenticating,
    ResolvingVault,
    ResolvingEntry,
    FetchingSecret,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Successor on the success path.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Idle => Some(Self::Authenticating),
            Self::Authenticating => Some(Self::ResolvingVault),
            Self::ResolvingVault => Some(Self::ResolvingEntry),
            Self::ResolvingEntry => Some(Self::FetchingSecret),
            Self::FetchingSecret => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Move to `to` if that is a legal transition from `self`.
    pub fn advance(self, to: Phase) -> Result<Phase, PipelineError> {
        let legal = if to == Self::Failed {
            !self.is_terminal()
        } else {
            self.next() == Some(to)
        };
        if legal {
            Ok(to)
        } else {
            Err(PipelineError::InvalidTransition { from: self, to })
        }
    }
}

/// A network stage of the run, used to annotate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticating,
    ResolvingVault,
    ResolvingEntry,
    FetchingSecret,
}

impl Stage {
    /// Fixed human-readable description reported on failure.
    pub fn label(self) -> &'static str {
        match self {
            Self::Authenticating => "Authentication failed",
            Self::ResolvingVault => "Failed to list vaults",
            Self::ResolvingEntry => "Failed to find entry",
            Self::FetchingSecret => "Failed to fetch entry secret",
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            Self::Authenticating => Phase::Authenticating,
            Self::ResolvingVault => Phase::ResolvingVault,
            Self::ResolvingEntry => Phase::ResolvingEntry,
            Self::FetchingSecret => Phase::FetchingSecret,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal failure of a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to set up vault client: {0}")]
    Setup(#[source] ApiError),

    #[error("{}", annotate(.stage, .status, .source))]
    Stage {
        stage: Stage,
        status: Option<u16>,
        #[source]
        source: ApiError,
    },

    #[error("Vault not found")]
    VaultNotFound,

    #[error("Cancelled")]
    Cancelled,

    #[error("invalid pipeline transition from {from:?} to {to:?}")]
    InvalidTransition { from: Phase, to: Phase },
}

impl PipelineError {
    fn at(stage: Stage) -> impl FnOnce(ApiError) -> PipelineError {
        move |source| PipelineError::Stage {
            stage,
            status: source.status(),
            source,
        }
    }

    /// HTTP status attached to a stage failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Stage { status, .. } => *status,
            _ => None,
        }
    }

    /// Stage the run was in when it failed, for stage failures.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::VaultNotFound => Some(Stage::ResolvingVault),
            _ => None,
        }
    }
}

fn annotate(stage: &Stage, status: &Option<u16>, source: &ApiError) -> String {
    match status {
        Some(status) => format!("{} (HTTP {status}): {source}", stage.label()),
        None => format!("{}: {source}", stage.label()),
    }
}

/// One run of the lookup chain.
///
/// Single use: [`Pipeline::run`] only starts from [`Phase::Idle`].
#[derive(Debug)]
pub struct Pipeline {
    client: VaultServerClient,
    inputs: Inputs,
    phase: Phase,
    scrubber: Scrubber,
}

impl Pipeline {
    pub fn new(inputs: Inputs) -> Result<Self, PipelineError> {
        let client =
            VaultServerClient::new(&inputs.server_url, &inputs.client).map_err(PipelineError::Setup)?;
        let mut scrubber = Scrubber::new();
        scrubber.register(inputs.app_secret.expose());

        Ok(Self {
            client,
            inputs,
            phase: Phase::Idle,
            scrubber,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Run every stage in order and return the fetched secret.
    ///
    /// On error the pipeline ends in [`Phase::Failed`].
    pub async fn run(&mut self) -> Result<SecretValue, PipelineError> {
        if self.phase != Phase::Idle {
            return Err(PipelineError::InvalidTransition {
                from: self.phase,
                to: Phase::Authenticating,
            });
        }

        match self.execute().await {
            Ok(secret) => {
                self.transition(Phase::Done)?;
                info!(
                    vault = %self.inputs.vault_name,
                    entry = %self.inputs.entry_name,
                    "secret retrieved"
                );
                Ok(secret)
            }
            Err(err) => {
                self.fail();
                warn!(
                    stage = ?err.stage(),
                    status = ?err.status(),
                    "run aborted"
                );
                Err(err)
            }
        }
    }

    /// Mark the run as failed from outside, e.g. on cancellation.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            debug!(from = ?self.phase, "pipeline failed");
            self.phase = Phase::Failed;
        }
    }

    /// Single-line failure message for the host, with every sensitive value
    /// seen during the run scrubbed out.
    pub fn failure_message(&self, err: &PipelineError) -> String {
        self.scrubber.scrub(&err.to_string())
    }

    fn enter(&mut self, stage: Stage) -> Result<(), PipelineError> {
        self.transition(stage.phase())
    }

    fn transition(&mut self, to: Phase) -> Result<(), PipelineError> {
        self.phase = self.phase.advance(to)?;
        debug!(phase = ?self.phase, "pipeline phase");
        Ok(())
    }

    async fn execute(&mut self) -> Result<SecretValue, PipelineError> {
        self.enter(Stage::Authenticating)?;
        let token = self
            .client
            .login(&self.inputs.app_key, self.inputs.app_secret.expose())
            .await
            .map_err(PipelineError::at(Stage::Authenticating))?;
        self.scrubber.register(token.expose());

        self.enter(Stage::ResolvingVault)?;
        let vault_id = self
            .client
            .find_vault_by_name(&token, &self.inputs.vault_name)
            .await
            .map_err(PipelineError::at(Stage::ResolvingVault))?
            .ok_or(PipelineError::VaultNotFound)?;
        debug!(vault_id = %vault_id, "resolved vault");

        self.enter(Stage::ResolvingEntry)?;
        let entry_id = self
            .client
            .find_entry_by_name(&token, &vault_id, &self.inputs.entry_name)
            .await
            .map_err(PipelineError::at(Stage::ResolvingEntry))?;
        debug!(entry_id = %entry_id, "resolved entry");

        self.enter(Stage::FetchingSecret)?;
        let secret = self
            .client
            .get_entry_password(&token, &vault_id, &entry_id)
            .await
            .map_err(PipelineError::at(Stage::FetchingSecret))?;
        self.scrubber.register(secret.expose());

        Ok(secret)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
