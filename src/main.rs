/*
 * Command line front end. Subcommands manage the list of datasource files,
 * list the candidate URLs and users found in them, preview the outcome of an
 * activation, and apply an activation to every managed file with a backup
 * per file. All of the actual editing lives in `core`; this layer only
 * parses arguments, loads the settings once, and reports per-file outcomes.
 */
mod core;

use std::collections::BTreeSet;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use crate::core::{CoreSettingsStore, DatasourceProcessor, Settings, SettingsStoreOperations};

const APP_NAME: &str = "DatasourceManager";

#[derive(Debug, Parser)]
#[command(
    name = "datasource_manager",
    version,
    about = "Switch datasource XML files between commented-out connection URLs and users"
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the list of datasource files operated on.
    #[command(subcommand)]
    Paths(PathsCommand),
    /// List candidate connection URLs and users across all managed files.
    Sources,
    /// Activate a connection URL and/or user in every managed file.
    Apply {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Fall back to the targets of the previous apply for omitted ones.
        #[arg(long)]
        last: bool,
    },
    /// Print the document an apply would write, without touching the file.
    Preview {
        file: PathBuf,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
    /// Inspect and adjust the backup settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum PathsCommand {
    /// Add files, or directories to scan recursively for .xml files.
    Add { entries: Vec<String> },
    /// Remove entries from the managed list.
    Remove { entries: Vec<String> },
    /// Print the managed list.
    List,
    /// Swap one managed path for another existing .xml file.
    Replace { old: String, new: String },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the current settings.
    Show,
    /// Set the backup directory; an empty string restores the default.
    SetBackupDir { dir: String },
    /// Set how many backups to keep per file.
    SetBackupLimit { limit: usize },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logger: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let store = CoreSettingsStore::new();
    match run(&store, cli.command) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(store: &dyn SettingsStoreOperations, command: Command) -> Result<ExitCode, Box<dyn Error>> {
    let mut settings = store.load_settings(APP_NAME)?;

    match command {
        Command::Paths(paths_command) => match paths_command {
            PathsCommand::Add { entries } => {
                let added = settings.add_paths(entries);
                store.save_settings(APP_NAME, &settings)?;
                println!(
                    "Added {added} file(s), {} managed in total.",
                    settings.paths.len()
                );
            }
            PathsCommand::Remove { entries } => {
                let removed = settings.remove_paths(entries);
                store.save_settings(APP_NAME, &settings)?;
                println!(
                    "Removed {removed} file(s), {} managed in total.",
                    settings.paths.len()
                );
            }
            PathsCommand::List => {
                for path in &settings.paths {
                    println!("{}", path.display());
                }
            }
            PathsCommand::Replace { old, new } => {
                settings.replace_path(&old, &new)?;
                store.save_settings(APP_NAME, &settings)?;
                println!("Replaced '{old}' with '{new}'.");
            }
        },
        Command::Sources => {
            let processor = processor_for(store, &settings)?;
            let mut all_urls = BTreeSet::new();
            let mut all_users = BTreeSet::new();
            for path in &settings.paths {
                match processor.collect_urls_and_users(path) {
                    Ok((urls, users)) => {
                        all_urls.extend(urls);
                        all_users.extend(users);
                    }
                    Err(e) => log::warn!("Skipping {}: {e}", path.display()),
                }
            }
            println!("Connection URLs:");
            for url in &all_urls {
                println!("  {url}");
            }
            println!("Users:");
            for user in &all_users {
                println!("  {user}");
            }
        }
        Command::Apply { url, user, last } => {
            let target_url = resolve_target(url, last, &settings.last_target_url);
            let target_user = resolve_target(user, last, &settings.last_username);
            if target_url.is_empty() && target_user.is_empty() {
                log::warn!("Neither --url nor --user given, nothing to apply.");
                return Ok(ExitCode::SUCCESS);
            }
            let processor = processor_for(store, &settings)?;
            let failures = apply_to_all(&processor, &settings.paths, &target_url, &target_user);
            if !target_url.is_empty() {
                settings.last_target_url = target_url;
            }
            if !target_user.is_empty() {
                settings.last_username = target_user;
            }
            store.save_settings(APP_NAME, &settings)?;
            if failures > 0 {
                log::error!("{failures} file(s) failed.");
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Preview { file, url, user } => {
            let processor = processor_for(store, &settings)?;
            let preview = processor.preview_changes(
                &file,
                url.as_deref().unwrap_or(""),
                user.as_deref().unwrap_or(""),
            )?;
            print!("{preview}");
        }
        Command::Config(config_command) => match config_command {
            ConfigCommand::Show => {
                println!("Managed files:   {}", settings.paths.len());
                println!(
                    "Backup dir:      {}",
                    settings
                        .backup_dir
                        .as_ref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_else(|| "(default)".to_string())
                );
                println!("Backup limit:    {}", settings.backup_retention_limit());
                println!("Last URL:        {}", settings.last_target_url);
                println!("Last user:       {}", settings.last_username);
            }
            ConfigCommand::SetBackupDir { dir } => {
                settings.backup_dir = if dir.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(dir))
                };
                store.save_settings(APP_NAME, &settings)?;
            }
            ConfigCommand::SetBackupLimit { limit } => {
                settings.backup_limit = limit;
                store.save_settings(APP_NAME, &settings)?;
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn processor_for(
    store: &dyn SettingsStoreOperations,
    settings: &Settings,
) -> Result<DatasourceProcessor, Box<dyn Error>> {
    let backup_dir = store.effective_backup_dir(APP_NAME, settings)?;
    Ok(DatasourceProcessor::new(
        &backup_dir,
        settings.backup_retention_limit(),
    ))
}

// One file failing must not keep the rest from being processed; the caller
// turns a non-zero failure count into the exit code once every file had its
// turn.
fn apply_to_all(
    processor: &DatasourceProcessor,
    paths: &[PathBuf],
    target_url: &str,
    target_user: &str,
) -> usize {
    let mut failures = 0usize;
    for path in paths {
        match processor.apply_changes_to_file(path, target_url, target_user) {
            Ok(backup_path) => {
                println!("{}: backed up to {}", path.display(), backup_path.display());
            }
            Err(e) => {
                failures += 1;
                println!("{}: FAILED ({e})", path.display());
            }
        }
    }
    failures
}

fn resolve_target(explicit: Option<String>, last: bool, remembered: &str) -> String {
    match explicit {
        Some(value) => value,
        None if last => remembered.to_string(),
        None => String::new(),
    }
}
