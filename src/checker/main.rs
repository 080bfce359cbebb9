//! Standalone checker for a broadcaster setup.
//!
//! Validates the scheduler configuration file and the contents of the
//! settings database: profile settings, destination references and
//! session files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use group_broadcaster::config::{BotSettings, SchedulerConfig};
use group_broadcaster::resolver::normalize_reference;
use group_broadcaster::store::{Profile, SettingsStore};
use group_broadcaster::telegram::{mask_phone, truncate_for_log};

/// Broadcaster setup checker.
#[derive(Parser, Debug)]
#[command(name = "check_setup")]
#[command(about = "Validates the broadcaster configuration and settings database")]
#[command(version)]
struct Args {
    /// Path to the scheduler JSON configuration file.
    #[arg(short, long, default_value = "broadcaster.json")]
    config: PathBuf,

    /// Path to the settings database (defaults to `BROADCASTER_DB`).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Generate an example configuration file at the specified path.
    #[arg(long)]
    generate_example: Option<PathBuf>,

    /// Show detailed information for each profile.
    #[arg(short, long)]
    verbose: bool,
}

/// Loads the .env file and describes why it could not be used.
///
/// A missing file is only reported in verbose mode, variables may come
/// from the shell.
fn load_env(path: &str, verbose: bool) -> Option<String> {
    match dotenvy::from_filename(path) {
        Ok(_) => None,
        Err(e) if e.not_found() => {
            verbose.then(|| format!("  No .env file at {path}, using the shell environment"))
        }
        Err(e) => Some(format!("⚠ Could not load {path}: {e}")),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Handle example generation
    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    if let Some(note) = load_env(&args.env_file, args.verbose) {
        println!("{note}");
    }

    let database = args
        .database
        .unwrap_or_else(|| BotSettings::from_env_with_defaults().database_path);

    let config_errors = check_config(&args.config);
    println!();
    let database_errors = check_database(&database, args.verbose);
    println!();

    let errors = config_errors + database_errors;
    if errors == 0 {
        println!("✓ Setup looks good!");
        ExitCode::SUCCESS
    } else {
        println!("✗ Check failed: {errors} error(s)");
        ExitCode::FAILURE
    }
}

fn generate_example(output_path: &Path) -> ExitCode {
    match SchedulerConfig::example().save_to_file(output_path) {
        Ok(()) => {
            println!(
                "✓ Example configuration written to: {}",
                output_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Checks the scheduler configuration. Returns the number of errors.
fn check_config(path: &Path) -> usize {
    println!("Configuration: {}", path.display());

    if !path.exists() {
        println!("  ⚠ File not found, defaults will be used");
        return 0;
    }

    let config = match SchedulerConfig::load_from_file(path) {
        Ok(config) => config,
        Err(e) => {
            println!("  ✗ Error: {e}");
            return 1;
        }
    };

    let errors = config.validate_all();
    for error in &errors {
        println!("  ✗ Error: {error}");
    }
    if errors.is_empty() {
        println!(
            "  ✓ OK (tick {}ms, strikes {}, cache max age {})",
            config.tick_interval_ms,
            config.unclassified_error_strikes,
            config
                .resolver_cache_max_age_secs
                .map_or_else(|| "none".to_owned(), |secs| format!("{secs}s"))
        );
    }
    errors.len()
}

/// Checks every stored profile. Returns the number of errors.
fn check_database(path: &Path, verbose: bool) -> usize {
    println!("Database: {}", path.display());

    // Opening a missing file would create an empty database.
    if !path.exists() {
        println!("  ✗ Error: database not found, run 'broadcaster add-profile' first");
        return 1;
    }

    let store = match SettingsStore::open(path) {
        Ok(store) => store,
        Err(e) => {
            println!("  ✗ Error: {e}");
            return 1;
        }
    };

    let profiles = match store.list_profiles() {
        Ok(profiles) => profiles,
        Err(e) => {
            println!("  ✗ Error: {e}");
            return 1;
        }
    };

    if profiles.is_empty() {
        println!("  ⚠ No profiles stored");
        return 0;
    }

    profiles
        .iter()
        .map(|profile| check_profile(&store, profile, verbose))
        .sum()
}

fn check_profile(store: &SettingsStore, profile: &Profile, verbose: bool) -> usize {
    let mut errors = 0;
    println!("  Profile #{} ({})", profile.id, mask_phone(&profile.phone));

    if let Err(e) = profile.settings.validate() {
        errors += 1;
        println!("    ✗ Error: {e}");
    }

    if !profile.session_path.exists() {
        println!(
            "    ⚠ Warning: session file {} is missing",
            profile.session_path.display()
        );
    }

    let destinations = match store.list_destinations(profile.id) {
        Ok(destinations) => destinations,
        Err(e) => {
            println!("    ✗ Error: {e}");
            return errors + 1;
        }
    };

    for reference in &destinations {
        match normalize_reference(reference) {
            Ok(canonical) if canonical == *reference => {
                if verbose {
                    println!("    ✓ {reference}");
                }
            }
            Ok(canonical) => {
                println!("    ⚠ Warning: {reference} is stored in non-canonical form ({canonical})");
            }
            Err(e) => {
                errors += 1;
                println!("    ✗ Error: {e}");
            }
        }
    }

    if verbose {
        println!(
            "    Broadcast {} every {}s at {}/min: \"{}\"",
            if profile.settings.broadcast_enabled { "on" } else { "off" },
            profile.settings.send_interval_secs,
            profile.settings.messages_per_minute,
            truncate_for_log(&profile.settings.broadcast_text, 40)
        );
    }
    println!("    {} destinations, {errors} error(s)", destinations.len());

    errors
}
