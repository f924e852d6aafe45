//! SuperApp CLI - drive the session core from a terminal.
//!
//! Every invocation behaves like an app launch: the stored session is
//! restored first, then the requested command runs against it.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use superapp_core::auth::{SignInForm, SignUpForm};
use superapp_core::{AuthError, Config, KeyValueStore, MemoryStore, SessionManager, SessionState};

/// Environment variable that prefills the email prompt
const EMAIL_ENV: &str = "SUPERAPP_EMAIL";

/// Environment variable that skips the password prompt
const PASSWORD_ENV: &str = "SUPERAPP_PASSWORD";

#[derive(Parser)]
#[command(name = "superapp", version, about = "SuperApp session manager")]
struct Cli {
    /// Keep the session in memory only, ignoring the configured store
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the current session
    Status {
        /// Print the session as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create an account and sign in
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
    },
    /// Sign in to the account on this device
    SignIn {
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out, keeping the account
    SignOut,
}

/// Credentials supplied through the environment instead of prompts.
#[derive(Debug, Default)]
struct Prefill {
    email: Option<String>,
    password: Option<String>,
}

impl Prefill {
    fn from_env() -> Self {
        Self {
            email: std::env::var(EMAIL_ENV).ok(),
            password: std::env::var(PASSWORD_ENV).ok(),
        }
    }
}

/// Asks the user for input.
trait Prompt {
    fn line(&mut self, label: &str) -> Result<String>;
    fn password(&mut self, label: &str) -> Result<String>;
}

struct Terminal;

impl Prompt for Terminal {
    fn line(&mut self, label: &str) -> Result<String> {
        print!("{}", label);
        io::stdout().flush()?;

        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn password(&mut self, label: &str) -> Result<String> {
        rpassword::prompt_password(label).context("Failed to read password")
    }
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_to_file.then(|| config.log_dir()) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "superapp.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: {:#}, using defaults", e);
            Config::default()
        }
    };

    let _log_guard = init_tracing(&config);
    info!(store = ?config.store, "SuperApp starting");

    let store: Arc<dyn KeyValueStore> = if cli.memory {
        Arc::new(MemoryStore::new())
    } else {
        config.open_store()?
    };
    let session = SessionManager::new(store).with_store_timeout(config.store_timeout());
    session.load_stored_session().await;

    let changed = run(
        cli.command,
        &session,
        &mut config,
        &Prefill::from_env(),
        &mut Terminal,
        &mut io::stdout(),
    )
    .await?;

    if changed {
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    info!("SuperApp shutting down");
    Ok(())
}

/// Run one command against a restored session.
///
/// Returns whether `config` changed and should be saved.
async fn run(
    command: Command,
    session: &SessionManager,
    config: &mut Config,
    prefill: &Prefill,
    prompt: &mut impl Prompt,
    out: &mut impl Write,
) -> Result<bool> {
    match command {
        Command::Status { json } => {
            print_status(out, &session.state(), json)?;
            Ok(false)
        }
        Command::SignUp { email, username } => {
            let (password, confirm_password) = match &prefill.password {
                Some(password) => (password.clone(), password.clone()),
                None => (
                    prompt.password("Password: ")?,
                    prompt.password("Confirm password: ")?,
                ),
            };
            let form = SignUpForm {
                email,
                username,
                password,
                confirm_password,
            };
            form.validate()?;

            session
                .sign_up(&form.email, &form.username, &form.password)
                .await
                .map_err(|e| explain(e, "Sign-up failed"))?;
            config.last_email = Some(form.email);
            print_status(out, &session.state(), false)?;
            Ok(true)
        }
        Command::SignIn { email } => {
            let email = match email
                .or_else(|| prefill.email.clone())
                .or_else(|| config.last_email.clone())
            {
                Some(email) => email,
                None => prompt.line("Email: ")?,
            };
            let password = match &prefill.password {
                Some(password) => password.clone(),
                None => prompt.password("Password: ")?,
            };
            let form = SignInForm { email, password };
            form.validate()?;

            session
                .sign_in(&form.email, &form.password)
                .await
                .map_err(|e| explain(e, "Sign-in failed"))?;
            config.last_email = Some(form.email);
            print_status(out, &session.state(), false)?;
            Ok(true)
        }
        Command::SignOut => {
            session.sign_out().await;
            if let Some(error) = session.error() {
                writeln!(out, "Warning: {}", error)?;
            }
            print_status(out, &session.state(), false)?;
            Ok(false)
        }
    }
}

/// Point storage failures at the store configuration rather than the user's input.
fn explain(e: AuthError, action: &str) -> anyhow::Error {
    if e.is_storage_failure() {
        anyhow::Error::new(e).context(format!(
            "{}: the session store is not working, check the `store` setting",
            action
        ))
    } else {
        anyhow::Error::new(e).context(action.to_string())
    }
}

fn print_status(out: &mut impl Write, state: &SessionState, json: bool) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, state)?;
        writeln!(out)?;
        return Ok(());
    }

    match state.user() {
        Some(user) => writeln!(
            out,
            "Signed in as {} <{}> (member since {})",
            user.username,
            user.email,
            user.created_at.format("%b %d, %Y")
        )?,
        None => writeln!(out, "Signed out")?,
    }
    if let Some(error) = state.error() {
        writeln!(out, "Last error: {}", error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use argon2::{Algorithm, Argon2, Params, Version};
    use clap::CommandFactory;

    use super::*;

    /// Answers prompts from a script and records what was asked.
    #[derive(Default)]
    struct Scripted {
        answers: VecDeque<String>,
        asked: Vec<String>,
    }

    impl Scripted {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                asked: Vec::new(),
            }
        }

        fn next(&mut self, label: &str) -> Result<String> {
            self.asked.push(label.to_string());
            self.answers
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("unexpected prompt {:?}", label))
        }
    }

    impl Prompt for Scripted {
        fn line(&mut self, label: &str) -> Result<String> {
            self.next(label)
        }

        fn password(&mut self, label: &str) -> Result<String> {
            self.next(label)
        }
    }

    async fn session(store: Arc<MemoryStore>) -> SessionManager {
        let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap();
        let session = SessionManager::new(store)
            .with_hasher(Argon2::new(Algorithm::Argon2id, Version::V0x13, params));
        session.load_stored_session().await;
        session
    }

    fn password_prefill() -> Prefill {
        Prefill {
            email: None,
            password: Some("secret1".to_string()),
        }
    }

    async fn run_captured(
        command: Command,
        session: &SessionManager,
        config: &mut Config,
        prefill: &Prefill,
        prompt: &mut Scripted,
    ) -> (Result<bool>, String) {
        let mut out = Vec::new();
        let result = run(command, session, config, prefill, prompt, &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    async fn with_account(store: &Arc<MemoryStore>) -> SessionManager {
        let session = session(store.clone()).await;
        session.sign_up("a@b.com", "alice", "secret1").await.unwrap();
        session.sign_out().await;
        session
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sign_up() {
        let cli = Cli::parse_from([
            "superapp",
            "--memory",
            "sign-up",
            "--email",
            "a@b.com",
            "--username",
            "alice",
        ]);
        assert!(cli.memory);
        match cli.command {
            Command::SignUp { email, username } => {
                assert_eq!(email, "a@b.com");
                assert_eq!(username, "alice");
            }
            _ => panic!("expected sign-up"),
        }
    }

    #[test]
    fn test_parse_sign_in_without_email() {
        let cli = Cli::parse_from(["superapp", "sign-in"]);
        assert!(!cli.memory);
        assert!(matches!(cli.command, Command::SignIn { email: None }));
    }

    #[tokio::test]
    async fn test_sign_up_validates_before_creating_account() {
        let store = Arc::new(MemoryStore::new());
        let session = session(store.clone()).await;
        let mut config = Config::default();
        let mut prompt = Scripted::answering(&["secret1", "secret2"]);

        let command = Command::SignUp {
            email: "a@b.com".to_string(),
            username: "alice".to_string(),
        };
        let (result, out) =
            run_captured(command, &session, &mut config, &Prefill::default(), &mut prompt).await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Passwords do not match");
        assert_eq!(prompt.asked, ["Password: ", "Confirm password: "]);
        assert!(out.is_empty());
        assert!(!store.contains("credentials"));
        assert!(!session.is_authenticated());
        assert!(config.last_email.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_remembers_email() {
        let store = Arc::new(MemoryStore::new());
        let session = session(store.clone()).await;
        let mut config = Config::default();

        let command = Command::SignUp {
            email: "a@b.com".to_string(),
            username: "alice".to_string(),
        };
        let (result, out) = run_captured(
            command,
            &session,
            &mut config,
            &password_prefill(),
            &mut Scripted::default(),
        )
        .await;

        assert!(result.unwrap());
        assert!(out.starts_with("Signed in as alice <a@b.com>"));
        assert_eq!(config.last_email.as_deref(), Some("a@b.com"));
        assert!(store.contains("credentials"));
    }

    #[tokio::test]
    async fn test_sign_in_email_from_environment_beats_config() {
        let store = Arc::new(MemoryStore::new());
        let session = with_account(&store).await;
        let mut config = Config {
            last_email: Some("old@b.com".to_string()),
            ..Config::default()
        };
        let prefill = Prefill {
            email: Some("a@b.com".to_string()),
            ..password_prefill()
        };

        let (result, _) = run_captured(
            Command::SignIn { email: None },
            &session,
            &mut config,
            &prefill,
            &mut Scripted::default(),
        )
        .await;

        assert!(result.unwrap());
        assert!(session.is_authenticated());
        assert_eq!(config.last_email.as_deref(), Some("a@b.com"));
    }

    #[tokio::test]
    async fn test_sign_in_email_flag_beats_environment() {
        let store = Arc::new(MemoryStore::new());
        let session = with_account(&store).await;
        let mut config = Config::default();
        let prefill = Prefill {
            email: Some("other@b.com".to_string()),
            ..password_prefill()
        };

        let (result, _) = run_captured(
            Command::SignIn {
                email: Some("a@b.com".to_string()),
            },
            &session,
            &mut config,
            &prefill,
            &mut Scripted::default(),
        )
        .await;

        assert!(result.unwrap());
        assert_eq!(session.user().unwrap().email, "a@b.com");
    }

    #[tokio::test]
    async fn test_sign_in_falls_back_to_config_then_prompt() {
        let store = Arc::new(MemoryStore::new());
        let session = with_account(&store).await;

        let mut config = Config {
            last_email: Some("a@b.com".to_string()),
            ..Config::default()
        };
        let mut prompt = Scripted::answering(&["secret1"]);
        let (result, _) = run_captured(
            Command::SignIn { email: None },
            &session,
            &mut config,
            &Prefill::default(),
            &mut prompt,
        )
        .await;
        assert!(result.unwrap());
        assert_eq!(prompt.asked, ["Password: "]);

        session.sign_out().await;
        let mut config = Config::default();
        let mut prompt = Scripted::answering(&["a@b.com", "secret1"]);
        let (result, _) = run_captured(
            Command::SignIn { email: None },
            &session,
            &mut config,
            &Prefill::default(),
            &mut prompt,
        )
        .await;
        assert!(result.unwrap());
        assert_eq!(prompt.asked, ["Email: ", "Password: "]);
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password_is_reported_as_input_error() {
        let store = Arc::new(MemoryStore::new());
        let session = with_account(&store).await;
        let mut config = Config::default();
        let prefill = Prefill {
            email: Some("a@b.com".to_string()),
            password: Some("wrong1".to_string()),
        };

        let (result, _) = run_captured(
            Command::SignIn { email: None },
            &session,
            &mut config,
            &prefill,
            &mut Scripted::default(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(format!("{:#}", err), "Sign-in failed: Invalid email or password");
        assert!(config.last_email.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_storage_failure_points_at_store() {
        let store = Arc::new(MemoryStore::new());
        let session = with_account(&store).await;
        store.fail_reads_of("credentials");
        let mut config = Config::default();
        let prefill = Prefill {
            email: Some("a@b.com".to_string()),
            ..password_prefill()
        };

        let (result, _) = run_captured(
            Command::SignIn { email: None },
            &session,
            &mut config,
            &prefill,
            &mut Scripted::default(),
        )
        .await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.starts_with("Sign-in failed: the session store is not working"));
        assert!(message.contains("Failed to read credentials"));
    }

    #[tokio::test]
    async fn test_sign_out_failure_prints_warning() {
        let store = Arc::new(MemoryStore::new());
        let session = session(store.clone()).await;
        session.sign_up("a@b.com", "alice", "secret1").await.unwrap();
        store.fail_writes_of("user");
        let mut config = Config::default();

        let (result, out) = run_captured(
            Command::SignOut,
            &session,
            &mut config,
            &Prefill::default(),
            &mut Scripted::default(),
        )
        .await;

        assert!(!result.unwrap());
        assert_eq!(
            out,
            "Warning: Failed to sign out\nSigned out\nLast error: Failed to sign out\n"
        );
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_status_json() {
        let store = Arc::new(MemoryStore::new());
        let session = session(store.clone()).await;
        session.sign_up("a@b.com", "alice", "secret1").await.unwrap();
        let mut config = Config::default();

        let (result, out) = run_captured(
            Command::Status { json: true },
            &session,
            &mut config,
            &Prefill::default(),
            &mut Scripted::default(),
        )
        .await;

        assert!(!result.unwrap());
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["isAuthenticated"], true);
        assert_eq!(value["isLoading"], false);
        assert_eq!(value["user"]["username"], "alice");
        assert!(value["error"].is_null());
    }

    #[tokio::test]
    async fn test_status_signed_out() {
        let session = session(Arc::new(MemoryStore::new())).await;
        let mut config = Config::default();

        let (result, out) = run_captured(
            Command::Status { json: false },
            &session,
            &mut config,
            &Prefill::default(),
            &mut Scripted::default(),
        )
        .await;

        assert!(!result.unwrap());
        assert_eq!(out, "Signed out\n");
    }
}
