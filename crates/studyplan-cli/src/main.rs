//! studyplan - command line front end for the planner's offline core.
//!
//! This binary is the composition root: it loads configuration, opens the
//! on-disk store, picks the remote backend, and wires the settings and
//! navigation services together for a single command.

mod credentials;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use studyplan_core::auth::{Session, SessionData};
use studyplan_core::utils::truncate;
use studyplan_core::{
    remote_from_config, ChangeType, Config, FileStore, KeyValueStore, NavigationState,
    NavigationSyncService, RouteCatalog, SettingsSyncService,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use credentials::CredentialStore;

// ============================================================================
// Constants
// ============================================================================

/// Subdirectory of the cache dir holding rolling log files
const LOG_DIR: &str = "logs";

const LOG_FILE_PREFIX: &str = "studyplan";

/// Column width for values in `pending` output
const PENDING_VALUE_WIDTH: usize = 30;

// ============================================================================
// Command line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "studyplan", version, about = "Offline-first settings and navigation state for the student planner")]
struct Cli {
    /// Also write logs to a daily rolling file in the cache directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remember the signed-in user and store their access token
    Login {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
        /// Access token issued by the backend's auth service
        #[arg(long)]
        token: Option<String>,
    },
    /// Forget the signed-in user along with their cached data
    Logout,
    /// Print the cached settings, refreshing when nothing is cached
    Show,
    /// Change one setting locally and queue it for sync
    Set {
        /// profile, notification_preferences or srs_preferences
        change_type: ChangeType,
        field: String,
        /// JSON value; anything that is not valid JSON is taken as a string
        value: String,
    },
    /// Push queued changes to the backend
    Sync,
    /// Reload settings from the backend
    Refresh,
    /// List changes waiting to be synced
    Pending,
    /// Inspect or edit the saved navigation state
    Nav {
        #[command(subcommand)]
        command: NavCommand,
    },
}

#[derive(Subcommand, Debug)]
enum NavCommand {
    /// Show the state the app would restore at startup
    Show,
    /// Save a navigation tree given as JSON
    Save { state: String },
    /// Remove the saved navigation state
    Clear,
}

// ============================================================================
// Composition root
// ============================================================================

struct App {
    session: Session,
    last_user_id: Option<String>,
    settings: Arc<SettingsSyncService>,
    navigation: NavigationSyncService,
}

impl App {
    async fn new(config: &Config) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        let store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::new(cache_dir.clone())
                .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?,
        );

        let mut session = Session::new(store.clone());
        session.load().await.context("Failed to load session")?;

        let token = session.user_id().and_then(|user_id| match CredentialStore::get_token(user_id) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(user_id = user_id, error = %e, "No access token available");
                None
            }
        });
        let remote = remote_from_config(config, token);

        let settings = Arc::new(SettingsSyncService::new(
            store.clone(),
            remote,
            config.sync.clone(),
        ));
        let navigation = NavigationSyncService::new(
            store,
            RouteCatalog::student_planner(),
            &config.navigation,
        );

        Ok(Self {
            session,
            last_user_id: config.last_user_id.clone(),
            settings,
            navigation,
        })
    }

    fn user_id(&self) -> Option<String> {
        self.session
            .user_id()
            .map(str::to_string)
            .or_else(|| self.last_user_id.clone())
    }

    fn require_user(&self) -> Result<String> {
        self.user_id()
            .context("Not signed in. Run `studyplan login --user-id <id>` first.")
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = log_dir.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir)
            .map_err(|e| eprintln!("Warning: file logging disabled: {}", e))
            .ok()
    });
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Interpret a command line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;

    let log_dir = if cli.log_file {
        Some(config.cache_dir()?.join(LOG_DIR))
    } else {
        None
    };
    let _log_guard = init_tracing(log_dir.as_deref());
    info!("studyplan starting");

    let mut app = App::new(&config).await?;
    let result = run(&mut app, cli.command).await;

    // Let any background sync or refresh finish before the runtime shuts down
    app.settings.wait_for_background().await;
    result
}

async fn run(app: &mut App, command: Command) -> Result<()> {
    match command {
        Command::Login { user_id, email, token } => {
            if let Some(token) = token {
                CredentialStore::store_token(&user_id, &token)?;
            }
            app.session.update(SessionData::new(user_id.clone(), email));
            app.session.save().await.context("Failed to save session")?;

            if app.navigation.handle_user_change(Some(&user_id)).await {
                println!("Cleared navigation state saved for a different user");
            }
            remember_user(Some(user_id.clone()))?;
            println!("Signed in as {}", user_id);
        }

        Command::Logout => {
            let Some(user_id) = app.user_id() else {
                println!("Not signed in");
                return Ok(());
            };
            app.settings.clear_cache(&user_id).await?;
            app.navigation.clear_state().await;
            if let Err(e) = CredentialStore::delete(&user_id) {
                warn!(user_id = %user_id, error = %e, "Failed to remove access token");
            }
            app.session.clear().await.context("Failed to clear session")?;
            remember_user(None)?;
            println!("Signed out {}", user_id);
        }

        Command::Show => {
            let user_id = app.require_user()?;
            let cache = app.settings.get_settings(&user_id).await?;
            println!("{}", serde_json::to_string_pretty(&cache)?);
            println!();
            println!("Name:        {}", cache.profile.display_name());
            println!("Last synced: {}", cache.age_display());
            let pending = app.settings.pending_changes(&user_id).await?;
            if !pending.is_empty() {
                println!("Pending:     {} change(s)", pending.len());
            }
        }

        Command::Set { change_type, field, value } => {
            let user_id = app.require_user()?;
            let value = parse_value(&value);
            app.settings
                .update_setting(&user_id, change_type, &field, value.clone())
                .await?;
            println!("{}.{} = {}", change_type, field, value);
        }

        Command::Sync => {
            let user_id = app.require_user()?;
            let outcome = app.settings.sync_pending_changes(&user_id).await;
            if outcome.is_empty() && app.settings.has_pending_changes(&user_id).await {
                println!("Nothing synced; changes remain queued for retry");
            } else {
                println!("Synced {} change(s)", outcome.synced);
            }
            if outcome.failed > 0 {
                eprintln!(
                    "Warning: {} change(s) were dropped after repeated failures and exist only on this device",
                    outcome.failed
                );
            }
        }

        Command::Refresh => {
            let user_id = app.require_user()?;
            let cache = app.settings.refresh_settings(&user_id).await?;
            println!("Refreshed settings for {}", cache.profile.display_name());
        }

        Command::Pending => {
            let user_id = app.require_user()?;
            let pending = app.settings.pending_changes(&user_id).await?;
            if pending.is_empty() {
                println!("No pending changes");
            }
            for change in pending {
                println!(
                    "{:<26} {:<24} {:<30} retries {}/{}",
                    change.change_type.to_string(),
                    change.field,
                    truncate(&change.value.to_string(), PENDING_VALUE_WIDTH),
                    change.retry_count,
                    change.max_retries
                );
            }
        }

        Command::Nav { command } => run_nav(app, command).await?,
    }
    Ok(())
}

async fn run_nav(app: &App, command: NavCommand) -> Result<()> {
    let user_id = app.user_id();
    match command {
        NavCommand::Show => {
            let state = app
                .navigation
                .get_safe_initial_state(app.session.is_valid(), false, user_id.as_deref())
                .await;
            match state {
                Some(state) => {
                    println!("Active route: {}", state.active_route_name().unwrap_or("-"));
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                None => println!("No restorable navigation state"),
            }
        }
        NavCommand::Save { state } => {
            let state: NavigationState =
                serde_json::from_str(&state).context("Invalid navigation state JSON")?;
            app.navigation
                .try_save_state(&state, user_id.as_deref())
                .await
                .context("Failed to save navigation state")?;
            println!("Saved navigation state at {}", state.active_route_name().unwrap_or("-"));
        }
        NavCommand::Clear => {
            app.navigation.try_clear_state().await?;
            println!("Cleared navigation state");
        }
    }
    Ok(())
}

/// Record the signed-in user in the config file as written, without the
/// environment overrides `Config::load` applies.
fn remember_user(user_id: Option<String>) -> Result<()> {
    let path = Config::config_path()?;
    let mut stored = Config::load_from(&path)?;
    stored.last_user_id = user_id;
    stored.save_to(&path)
}
