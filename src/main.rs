//! Group Broadcaster - Main Entry Point
//!
//! A multi-account Telegram userbot that broadcasts a message to groups on
//! a schedule and answers private messages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use group_broadcaster::autoreply::AutoResponder;
use group_broadcaster::commands::{CommandHandler, seed_memberships};
use group_broadcaster::config::{BotSettings, SchedulerConfig, TelegramConfig};
use group_broadcaster::resolver::DestinationResolver;
use group_broadcaster::scheduler::{BroadcastScheduler, SchedulerMessage};
use group_broadcaster::store::{NewProfile, Profile, ProfileId, SettingsStore};
use group_broadcaster::telegram::{
    MessagingSession, TelegramError, TelegramSession, mask_phone,
};

/// Id used for log lines while an account logs in for the first time.
const PENDING_PROFILE: ProfileId = ProfileId(0);

/// Multi-account Telegram group broadcaster.
#[derive(Parser, Debug)]
#[command(name = "broadcaster")]
#[command(about = "Broadcast messages to Telegram groups from several accounts")]
#[command(version)]
struct Args {
    /// Path to the scheduler JSON configuration file.
    #[arg(short, long, default_value = "broadcaster.json", global = true)]
    config: PathBuf,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env", global = true)]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Connect every profile and start broadcasting (default).
    Run,

    /// Log in a new account and store it as a profile.
    AddProfile,

    /// Write an example scheduler configuration and exit.
    GenerateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&args.config).await,
        Command::AddProfile => add_profile().await,
        Command::GenerateConfig => generate_example_config(),
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Generates an example configuration file.
fn generate_example_config() -> Result<()> {
    let example = SchedulerConfig::example();
    example
        .save_to_file("broadcaster.example.json")
        .context("Failed to write example configuration")?;

    println!("✓ Example configuration written to: broadcaster.example.json");
    println!("\nTo use the broadcaster:");
    println!("1. Copy broadcaster.example.json to broadcaster.json and adjust it");
    println!("2. Create a .env file with TG_API_ID and TG_API_HASH");
    println!("3. Run: broadcaster add-profile");
    println!("4. Run: broadcaster");

    Ok(())
}

fn load_scheduler_config(path: &Path) -> Result<SchedulerConfig> {
    let config = SchedulerConfig::load_or_default(path)
        .with_context(|| format!("Failed to load scheduler configuration {}", path.display()))?;
    config
        .validate()
        .context("Scheduler configuration validation failed")?;
    Ok(config)
}

fn open_store(settings: &BotSettings) -> Result<SettingsStore> {
    SettingsStore::open(&settings.database_path).with_context(|| {
        format!(
            "Failed to open settings database {}",
            settings.database_path.display()
        )
    })
}

/// Connects every profile and runs until Ctrl+C or `quit`.
async fn run(config_path: &Path) -> Result<()> {
    let config = load_scheduler_config(config_path)?;
    let settings = BotSettings::from_env_with_defaults();
    let store = Arc::new(open_store(&settings)?);

    let resolver = Arc::new(DestinationResolver::new(config.resolver_cache_max_age()));
    let scheduler = Arc::new(BroadcastScheduler::new(
        Arc::clone(&store),
        Arc::clone(&resolver),
        &config,
    ));

    let profiles = store.list_profiles().context("Failed to list profiles")?;
    if profiles.is_empty() {
        warn!("No profiles configured. Run 'broadcaster add-profile' first.");
    }

    let mut responders = Vec::new();
    for profile in &profiles {
        let Some(session) = connect_profile(profile).await else {
            continue;
        };

        if config.seed_memberships_on_startup
            && let Err(e) = seed_memberships(&store, profile.id, session.as_ref()).await
        {
            warn!("Profile {}: membership seeding failed: {}", profile.id, e);
        }

        scheduler.register_session(Arc::clone(&session));
        responders.push(tokio::spawn(
            AutoResponder::new(Arc::clone(&store), session).run(),
        ));
    }

    info!(
        "{} of {} profiles connected",
        scheduler.connected_profiles().len(),
        profiles.len()
    );

    // Create scheduler channel
    let (scheduler_tx, scheduler_rx) = mpsc::channel::<SchedulerMessage>(32);

    // Spawn scheduler task
    let scheduler_handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move {
            scheduler.run(scheduler_rx).await;
        }
    });

    let handler = CommandHandler::new(Arc::clone(&store), resolver, Arc::clone(&scheduler));
    let console = tokio::spawn(run_console(handler, scheduler_tx.clone()));

    info!("Broadcaster is running. Type 'help' for commands, Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        () = wait_for_quit(console) => {
            info!("Quit requested, shutting down...");
        }
    }

    // Cleanup
    if scheduler_tx.send(SchedulerMessage::Shutdown).await.is_err() {
        debug!("Scheduler already stopped");
    }
    if let Err(e) = scheduler_handle.await {
        warn!("Scheduler task failed: {}", e);
    }
    for responder in responders {
        responder.abort();
    }

    Ok(())
}

/// Connects one stored profile. Failures are logged and the profile skipped.
async fn connect_profile(profile: &Profile) -> Option<Arc<dyn MessagingSession>> {
    let session =
        match TelegramSession::connect(profile.id, profile.api_id, &profile.session_path).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Profile {}: failed to connect: {}", profile.id, e);
                return None;
            }
        };

    match session.is_authorized().await {
        Ok(true) => Some(Arc::new(session)),
        Ok(false) => {
            warn!(
                "Profile {} ({}): session is no longer authorized, run 'broadcaster add-profile' again",
                profile.id,
                mask_phone(&profile.phone)
            );
            session.disconnect();
            None
        }
        Err(e) => {
            warn!("Profile {}: failed to check authorization: {}", profile.id, e);
            session.disconnect();
            None
        }
    }
}

/// Reads operator commands from stdin.
///
/// Returns `true` when the operator asked to quit and `false` when stdin
/// was closed.
async fn run_console(handler: CommandHandler, scheduler_tx: mpsc::Sender<SchedulerMessage>) -> bool {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Console input closed");
                return false;
            }
            Err(e) => {
                warn!("Failed to read console input: {}", e);
                return false;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let Some(result) = handler.try_handle(&line).await else {
            println!("Unknown command. Type 'help' for the list of commands.");
            continue;
        };

        if result.success {
            println!("{}", result.message);
        } else {
            println!("✗ {}", result.message);
        }

        if let Some(profile_id) = result.trigger_cycle
            && scheduler_tx
                .send(SchedulerMessage::TriggerCycle(profile_id))
                .await
                .is_err()
        {
            warn!("Scheduler is not running");
        }

        if result.quit {
            return true;
        }
    }
}

/// Resolves when the console asks to quit. A closed stdin never resolves.
async fn wait_for_quit(console: JoinHandle<bool>) {
    match console.await {
        Ok(true) => {}
        Ok(false) => std::future::pending().await,
        Err(e) => {
            warn!("Console task failed: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Logs in a new account and stores it as a profile.
async fn add_profile() -> Result<()> {
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;
    let settings = BotSettings::from_env_with_defaults();
    let store = open_store(&settings)?;

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let session_path = settings.session_path_for(&phone);
    if let Some(parent) = session_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let session = TelegramSession::connect(PENDING_PROFILE, tg_config.api_id, &session_path)
        .await
        .context("Failed to connect to Telegram")?;

    if session
        .is_authorized()
        .await
        .context("Failed to check authorization")?
    {
        info!("Session {} is already authorized", session_path.display());
    } else {
        authenticate(&session, &phone, &tg_config).await?;
    }

    let profile_id = store
        .create_profile(&NewProfile {
            api_id: tg_config.api_id,
            api_hash: tg_config.api_hash.clone(),
            phone: phone.clone(),
            session_path: session_path.clone(),
        })
        .context("Failed to store profile")?;

    println!(
        "✓ Profile #{profile_id} created for {}",
        mask_phone(&phone)
    );

    match seed_memberships(&store, profile_id, &session).await {
        Ok(summary) => println!(
            "✓ Imported {} groups the account already belongs to",
            summary.added
        ),
        Err(e) => warn!("Profile {}: membership seeding failed: {}", profile_id, e),
    }

    session.disconnect();

    println!("\nEnable broadcasting from the console with: broadcast {profile_id} on");

    Ok(())
}

/// Handles Telegram authentication.
async fn authenticate(session: &TelegramSession, phone: &str, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let token = session
        .request_login_code(phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match session.sign_in(&token, &code).await {
        Ok(()) => Ok(()),
        Err(TelegramError::PasswordRequired(mut password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint").to_owned();
            info!("Password hint: {}", hint);

            // Telegram allows a few attempts before the token expires.
            for attempt in 1..=3 {
                let password: String = Password::new()
                    .with_prompt("Enter your 2FA password")
                    .interact()?;

                match session.check_password(password_token, &password).await {
                    Ok(()) => return Ok(()),
                    Err(TelegramError::InvalidPassword(token)) if attempt < 3 => {
                        warn!("Invalid password, try again");
                        password_token = token;
                    }
                    Err(e) => return Err(e).context("2FA authentication failed"),
                }
            }
            bail!("2FA authentication failed")
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
