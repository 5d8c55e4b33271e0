//! Host-facing sinks of the step: masking, exported variables, step outputs
//! and the failure signal.
//!
//! [`GithubActionsHost`] speaks the GitHub Actions runner protocol: workflow
//! commands on stdout and `name<<DELIM` blocks appended to the `GITHUB_ENV`
//! and `GITHUB_OUTPUT` command files.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};
use uuid::Uuid;

/// Env var naming the file that collects exported environment variables.
pub const GITHUB_ENV: &str = "GITHUB_ENV";

/// Env var naming the file that collects step outputs.
pub const GITHUB_OUTPUT: &str = "GITHUB_OUTPUT";

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to write workflow command")]
    Stdout(#[source] io::Error),

    #[error("failed to append to {}", path.display())]
    CommandFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("value for '{0}' collides with the command file delimiter")]
    DelimiterCollision(String),
}

/// The pipeline host the step publishes to.
pub trait PipelineHost {
    /// Verify every sink can be written before anything is published.
    fn check_ready(&mut self) -> Result<(), HostError> {
        Ok(())
    }

    /// Register `value` so the host redacts it from all later log output.
    fn mask(&mut self, value: &str) -> Result<(), HostError>;

    /// Make `value` available to later steps as environment variable `name`.
    fn export_variable(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    /// Set step output `name`.
    fn set_output(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    /// Report the single failure message of the run.
    fn set_failed(&mut self, message: &str);
}

/// GitHub Actions runner host.
#[derive(Debug)]
pub struct GithubActionsHost<W: Write> {
    out: W,
    env_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
}

impl GithubActionsHost<io::Stdout> {
    /// Host writing commands to stdout, with command files from the runner's env.
    pub fn from_env() -> Self {
        Self::new(io::stdout(), path_from_env(GITHUB_ENV), path_from_env(GITHUB_OUTPUT))
    }
}

fn path_from_env(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl<W: Write> GithubActionsHost<W> {
    pub fn new(out: W, env_file: Option<PathBuf>, output_file: Option<PathBuf>) -> Self {
        Self {
            out,
            env_file,
            output_file,
        }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.out
    }

    fn command(&mut self, command: &str, data: &str) -> Result<(), HostError> {
        writeln!(self.out, "::{command}::{}", escape_data(data))
            .and_then(|()| self.out.flush())
            .map_err(HostError::Stdout)
    }
}

impl<W: Write> PipelineHost for GithubActionsHost<W> {
    fn check_ready(&mut self) -> Result<(), HostError> {
        for path in [&self.env_file, &self.output_file].into_iter().flatten() {
            open_command_file(path)?;
        }
        Ok(())
    }

    fn mask(&mut self, value: &str) -> Result<(), HostError> {
        self.command("add-mask", value)?;
        // The runner matches masks per log line, so multi-line values need
        // each line registered on its own as well.
        if value.contains('\n') {
            for line in value.lines().map(|l| l.trim_end_matches('\r')) {
                if !line.trim().is_empty() {
                    self.command("add-mask", line)?;
                }
            }
        }
        Ok(())
    }

    fn export_variable(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        match &self.env_file {
            Some(path) => append_command_file(path, name, value),
            None => {
                warn!(variable = name, "{GITHUB_ENV} is not set; variable not exported");
                Ok(())
            }
        }
    }

    fn set_output(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        match &self.output_file {
            Some(path) => append_command_file(path, name, value),
            None => {
                warn!(output = name, "{GITHUB_OUTPUT} is not set; output not set");
                Ok(())
            }
        }
    }

    fn set_failed(&mut self, message: &str) {
        error!("{message}");
        if let Err(e) = self.command("error", message) {
            error!("could not report failure to the runner: {e}");
        }
    }
}

/// `%`, CR and LF are the characters the runner unescapes in command data.
fn escape_data(data: &str) -> String {
    data.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Append a `name<<DELIM` block to a runner command file.
fn append_command_file(path: &Path, name: &str, value: &str) -> Result<(), HostError> {
    let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
    if name.contains(&delimiter) || value.contains(&delimiter) {
        return Err(HostError::DelimiterCollision(name.to_owned()));
    }

    let mut file = open_command_file(path)?;
    write!(file, "{name}<<{delimiter}\n{value}\n{delimiter}\n").map_err(|source| {
        HostError::CommandFile {
            path: path.to_owned(),
            source,
        }
    })
}

fn open_command_file(path: &Path) -> Result<File, HostError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| HostError::CommandFile {
            path: path.to_owned(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
