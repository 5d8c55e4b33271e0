mod config;
mod host;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use vaultpull_core::{Inputs, Pipeline, PipelineError, RawInputs, SecretValue, PASSWORD_OUTPUT};

use crate::config::ConfigFileError;
use crate::host::{GithubActionsHost, HostError, PipelineHost};

/// Fetch a password from a vault server and hand it to the CI pipeline as a
/// masked secret.
///
/// Every input can also come from the `INPUT_*` variable the runner sets for
/// step inputs, or from a TOML file.
#[derive(Debug, Parser)]
#[command(name = "vaultpull", version)]
struct Cli {
    /// TOML file with the same keys as the flags below (lowest precedence).
    #[arg(long, env = "VAULTPULL_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the vault server (https://, or http:// for localhost only).
    #[arg(long, env = "INPUT_SERVER_URL")]
    server_url: Option<String>,

    /// Application key used to log in.
    #[arg(long, env = "INPUT_APP_KEY")]
    app_key: Option<String>,

    /// Application secret used to log in.
    #[arg(long, env = "INPUT_APP_SECRET", hide_env_values = true)]
    app_secret: Option<String>,

    /// Name of the vault holding the entry.
    #[arg(long, env = "INPUT_VAULT_NAME")]
    vault_name: Option<String>,

    /// Name of the entry whose password is fetched.
    #[arg(long, env = "INPUT_ENTRY_NAME")]
    entry_name: Option<String>,

    /// Environment variable the password is exported as.
    #[arg(long, env = "INPUT_OUTPUT_VARIABLE")]
    output_variable: Option<String>,

    /// Per-request timeout in seconds (default 30).
    #[arg(long, env = "INPUT_TIMEOUT_SECS")]
    timeout_secs: Option<String>,

    /// Accept any TLS certificate from the server. Use only against servers
    /// you control.
    #[arg(long, env = "INPUT_INSECURE_SKIP_TLS_VERIFY")]
    insecure_skip_tls_verify: Option<String>,
}

impl Cli {
    fn raw_inputs(&self) -> RawInputs {
        RawInputs {
            server_url: self.server_url.clone(),
            app_key: self.app_key.clone(),
            app_secret: self.app_secret.clone(),
            vault_name: self.vault_name.clone(),
            entry_name: self.entry_name.clone(),
            output_variable: self.output_variable.clone(),
            timeout_secs: self.timeout_secs.clone(),
            insecure_skip_tls_verify: self.insecure_skip_tls_verify.clone(),
        }
    }

    /// Flags/env vars layered over the optional config file.
    fn resolve_inputs(&self) -> Result<RawInputs, ConfigFileError> {
        let file = match &self.config {
            Some(path) => config::load_file(path)?,
            None => RawInputs::default(),
        };
        Ok(self.raw_inputs().or(file))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let mut host = GithubActionsHost::from_env();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            host.set_failed(e.to_string().trim_end());
            return ExitCode::FAILURE;
        }
    };

    let raw = match cli.resolve_inputs() {
        Ok(raw) => raw,
        Err(e) => {
            host.set_failed(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    if run_step(raw, &mut host, cancel_signal()).await {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Logs go to stderr; stdout carries workflow commands only.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn cancel_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available: never cancel.
        std::future::pending::<()>().await;
    }
}

/// Validate inputs, run the pipeline and publish the secret.
///
/// Returns whether the step succeeded. On failure exactly one message is
/// reported through [`PipelineHost::set_failed`] and nothing is published.
async fn run_step<H, C>(raw: RawInputs, host: &mut H, cancel: C) -> bool
where
    H: PipelineHost,
    C: std::future::Future<Output = ()>,
{
    let inputs = match Inputs::from_raw(raw) {
        Ok(inputs) => inputs,
        Err(e) => {
            host.set_failed(&e.to_string());
            return false;
        }
    };

    let mut pipeline = match Pipeline::new(inputs) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            host.set_failed(&e.to_string());
            return false;
        }
    };

    info!(
        server = %pipeline.inputs().server_url,
        vault = %pipeline.inputs().vault_name,
        entry = %pipeline.inputs().entry_name,
        "fetching secret"
    );

    let result = tokio::select! {
        result = pipeline.run() => result,
        () = cancel => Err(PipelineError::Cancelled),
    };

    let secret = match result {
        Ok(secret) => secret,
        Err(e) => {
            pipeline.fail();
            host.set_failed(&pipeline.failure_message(&e));
            return false;
        }
    };

    let variable = pipeline.inputs().output_variable.clone();
    if let Err(e) = publish(host, &variable, &secret) {
        host.set_failed(&e.to_string());
        return false;
    }
    info!(variable = %variable, "secret published");
    true
}

/// Sinks are checked before anything is written, so a broken sink cannot
/// leave the secret exported while the step reports failure. Masking comes
/// first so the value is redacted before it reaches any sink.
fn publish<H: PipelineHost>(
    host: &mut H,
    variable: &str,
    secret: &SecretValue,
) -> Result<(), HostError> {
    host.check_ready()?;
    host.mask(secret.expose())?;
    host.export_variable(variable, secret.expose())?;
    host.set_output(PASSWORD_OUTPUT, secret.expose())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every host call in order.
    #[derive(Debug, Default)]
    struct RecordingHost {
        calls: Vec<String>,
    }

    impl PipelineHost for RecordingHost {
        fn mask(&mut self, value: &str) -> Result<(), HostError> {
            self.calls.push(format!("mask {value}"));
            Ok(())
        }

        fn export_variable(&mut self, name: &str, value: &str) -> Result<(), HostError> {
            self.calls.push(format!("export {name}={value}"));
            Ok(())
        }

        fn set_output(&mut self, name: &str, value: &str) -> Result<(), HostError> {
            self.calls.push(format!("output {name}={value}"));
            Ok(())
        }

        fn set_failed(&mut self, message: &str) {
            self.calls.push(format!("failed {message}"));
        }
    }

    fn raw(server: &MockServer, vault_name: &str) -> RawInputs {
        RawInputs {
            server_url: Some(server.uri()),
            app_key: Some("key".into()),
            app_secret: Some("app-secret".into()),
            vault_name: Some(vault_name.into()),
            entry_name: Some("db".into()),
            output_variable: Some("DB_PASSWORD".into()),
            ..RawInputs::default()
        }
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    async fn mount_happy_path(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"tokenId": "tok123"})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/vault"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "v1", "name": "prod"}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/vault/v1/entry"))
            .and(query_param("name", "db"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"id": "e9"}})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/vault/v1/entry/e9"))
            .and(query_param("includeSensitiveData", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"password": "s3cr3t"}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn publishes_masked_secret_in_order() {
        let server = MockServer::start().await;
        mount_happy_path(&server).await;

        let mut host = RecordingHost::default();
        assert!(run_step(raw(&server, "prod"), &mut host, never()).await);
        assert_eq!(
            host.calls,
            vec![
                "mask s3cr3t",
                "export DB_PASSWORD=s3cr3t",
                "output password=s3cr3t",
            ]
        );
    }

    #[tokio::test]
    async fn vault_not_found_publishes_nothing() {
        let server = MockServer::start().await;
        mount_happy_path(&server).await;

        let mut host = RecordingHost::default();
        assert!(!run_step(raw(&server, "missing"), &mut host, never()).await);
        assert_eq!(host.calls, vec!["failed Vault not found"]);
    }

    #[tokio::test]
    async fn invalid_inputs_fail_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut host = RecordingHost::default();
        let inputs = RawInputs {
            output_variable: None,
            ..raw(&server, "prod")
        };
        assert!(!run_step(inputs, &mut host, never()).await);
        assert_eq!(
            host.calls,
            vec!["failed missing required input 'output_variable'"]
        );
    }

    #[tokio::test]
    async fn cancellation_publishes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"tokenId": "tok123"}))
                    .set_delay(std::time::Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let mut host = RecordingHost::default();
        assert!(!run_step(raw(&server, "prod"), &mut host, async {}).await);
        assert_eq!(host.calls, vec!["failed Cancelled"]);
    }

    #[tokio::test]
    async fn failure_message_never_contains_app_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let mut host = RecordingHost::default();
        assert!(!run_step(raw(&server, "prod"), &mut host, never()).await);
        assert_eq!(host.calls.len(), 1);
        assert!(host.calls[0].starts_with("failed Authentication failed (HTTP 403)"));
        assert!(!host.calls[0].contains("app-secret"));
    }

    #[tokio::test]
    async fn blank_non_string_inputs_count_as_unset() {
        let server = MockServer::start().await;
        mount_happy_path(&server).await;

        let cli = Cli::try_parse_from([
            "vaultpull",
            "--timeout-secs=",
            "--insecure-skip-tls-verify=",
        ])
        .unwrap();
        let flags = cli.resolve_inputs().unwrap();
        assert_eq!(flags.timeout_secs.as_deref(), Some(""));

        let mut host = RecordingHost::default();
        assert!(run_step(flags.or(raw(&server, "prod")), &mut host, never()).await);
        assert_eq!(
            host.calls.last().map(String::as_str),
            Some("output password=s3cr3t")
        );
    }

    #[tokio::test]
    async fn malformed_timeout_reaches_host_as_failure() {
        let server = MockServer::start().await;
        let mut host = RecordingHost::default();
        let inputs = RawInputs {
            timeout_secs: Some("abc".into()),
            ..raw(&server, "prod")
        };
        assert!(!run_step(inputs, &mut host, never()).await);
        assert_eq!(
            host.calls,
            vec!["failed input 'timeout_secs' must be a whole number of seconds, got 'abc'"]
        );
    }

    #[tokio::test]
    async fn malformed_tls_flag_reaches_host_as_failure() {
        let server = MockServer::start().await;
        let mut host = RecordingHost::default();
        let inputs = RawInputs {
            insecure_skip_tls_verify: Some("maybe".into()),
            ..raw(&server, "prod")
        };
        assert!(!run_step(inputs, &mut host, never()).await);
        assert_eq!(host.calls.len(), 1);
        assert!(host.calls[0]
            .starts_with("failed input 'insecure_skip_tls_verify' must be a boolean"));
    }

    #[test]
    fn runner_env_values_parse_without_clap_errors() {
        // Runner inputs arrive as INPUT_* env vars; blank and malformed
        // values must get past clap and be judged during validation.
        for (var, value) in [
            ("INPUT_TIMEOUT_SECS", ""),
            ("INPUT_TIMEOUT_SECS", "abc"),
            ("INPUT_INSECURE_SKIP_TLS_VERIFY", ""),
            ("INPUT_INSECURE_SKIP_TLS_VERIFY", "maybe"),
        ] {
            std::env::set_var(var, value);
            let parsed = Cli::try_parse_from(["vaultpull"]);
            std::env::remove_var(var);
            let cli = parsed.unwrap_or_else(|e| panic!("{var}={value:?}: {e}"));
            let raw = cli.raw_inputs();
            let seen = if var == "INPUT_TIMEOUT_SECS" {
                raw.timeout_secs
            } else {
                raw.insecure_skip_tls_verify
            };
            // clap may drop an empty env value or keep it as ""; both are unset.
            assert!(seen.as_deref().unwrap_or("") == value, "{var}={value:?}");
        }
    }

    #[test]
    fn help_is_not_a_failure() {
        let err = Cli::try_parse_from(["vaultpull", "--help"]).unwrap_err();
        assert!(!err.use_stderr());

        let err = Cli::try_parse_from(["vaultpull", "--no-such-flag"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn missing_config_file_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let cli =
            Cli::try_parse_from(["vaultpull", "--config", missing.to_str().unwrap()]).unwrap();
        assert!(matches!(
            cli.resolve_inputs(),
            Err(ConfigFileError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn unwritable_output_file_exports_nothing() {
        let server = MockServer::start().await;
        mount_happy_path(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("env");
        let output_file = dir.path().join("missing-dir").join("output");
        let mut host =
            GithubActionsHost::new(Vec::new(), Some(env_file.clone()), Some(output_file));

        assert!(!run_step(raw(&server, "prod"), &mut host, never()).await);
        let env_contents = std::fs::read_to_string(&env_file).unwrap_or_default();
        assert!(!env_contents.contains("s3cr3t"));
        assert!(!env_contents.contains("DB_PASSWORD"));
    }

    #[test]
    fn cli_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaultpull.toml");
        std::fs::write(
            &path,
            "server_url = \"https://file.example.com\"\nvault_name = \"from-file\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "vaultpull",
            "--config",
            path.to_str().unwrap(),
            "--vault-name",
            "from-flag",
            "--insecure-skip-tls-verify",
            "yes",
        ])
        .unwrap();
        let raw = cli.resolve_inputs().unwrap();
        assert_eq!(raw.vault_name.as_deref(), Some("from-flag"));
        assert_eq!(raw.server_url.as_deref(), Some("https://file.example.com"));
        assert_eq!(raw.insecure_skip_tls_verify.as_deref(), Some("yes"));
    }
}
