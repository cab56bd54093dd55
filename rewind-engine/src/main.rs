//! rewind - command line front end for the backup engine
//!
//! Engine events are written to stdout as JSON lines; logs go to stderr.

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use rewind_engine::{
    utils, BackupManager, BackupOptions, BackupRecord, Config, EngineError, Game, OperationHandle,
    SaveProfile,
};
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backup root directory (overrides config)
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GameArgs {
    #[arg(long)]
    game_id: String,

    /// Defaults to the game id
    #[arg(long)]
    game_name: Option<String>,

    /// Save directory of the game
    #[arg(long, value_name = "DIR")]
    save_path: PathBuf,
}

#[derive(Args, Debug)]
struct BackupRef {
    #[arg(long)]
    game_id: String,

    #[arg(long)]
    backup_id: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up a save directory, or only the files given with --file
    Create {
        #[command(flatten)]
        game: GameArgs,

        /// Display name; defaults to the current date and time
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        notes: String,

        /// Path relative to the save directory; repeat for a profile backup
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<String>,

        #[arg(long, default_value_t = 0)]
        profile_id: i64,

        #[arg(long)]
        profile_name: Option<String>,
    },

    /// List a game's backups, newest first
    List {
        #[arg(long)]
        game_id: String,
    },

    /// Restore a backup into a save directory
    Restore {
        #[command(flatten)]
        backup: BackupRef,

        #[arg(long, value_name = "DIR")]
        save_path: PathBuf,
    },

    /// Check that a backup's archive decodes end to end
    Verify {
        #[command(flatten)]
        backup: BackupRef,
    },

    /// Delete a backup's archive and metadata
    Delete {
        #[command(flatten)]
        backup: BackupRef,
    },

    /// Change a backup's display name or notes
    Rename {
        #[command(flatten)]
        backup: BackupRef,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// List every game that has backups
    Games,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(dir) = cli.backup_dir {
        config.storage.backup_dir = dir;
    }

    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    info!("Starting rewind v{}", env!("CARGO_PKG_VERSION"));

    let manager = BackupManager::new(&config)?;
    let printer = spawn_event_printer(&manager);

    let result = run(&manager, cli.command).await;

    // The printer stops once the last sender is gone.
    drop(manager);
    if let Err(e) = printer.await {
        warn!("Event printer task failed: {}", e);
    }

    result
}

async fn run(manager: &BackupManager, command: Command) -> Result<()> {
    match command {
        Command::Create {
            game,
            name,
            notes,
            files,
            profile_id,
            profile_name,
        } => {
            let game = Game::detected(
                game.game_id.clone(),
                game.game_name.unwrap_or(game.game_id),
                game.save_path,
            );
            let mut options = match name {
                Some(name) => BackupOptions::named(name),
                None => BackupOptions::default(),
            }
            .with_notes(notes);
            if !files.is_empty() {
                options = options.with_profile(SaveProfile {
                    id: profile_id,
                    name: profile_name.unwrap_or_else(|| format!("profile-{}", profile_id)),
                    files,
                });
            }

            let handle = manager.create_backup_async(&game, options)?;
            let record = wait_or_cancel(manager, handle).await?;
            print_record(&record)?;
        }

        Command::List { game_id } => {
            for record in manager.backups_for_game(&game_id) {
                print_record(&record)?;
            }
        }

        Command::Restore { backup, save_path } => {
            let record = lookup(manager, &backup)?;
            let handle = manager.restore_backup_async(&record, &save_path)?;
            wait_or_cancel(manager, handle).await?;
        }

        Command::Verify { backup } => {
            let record = lookup(manager, &backup)?;
            if !manager.verify_backup(&record) {
                bail!("Backup {} of {} is damaged", record.id, record.game_id);
            }
        }

        Command::Delete { backup } => {
            let record = lookup(manager, &backup)?;
            manager.delete_backup(&record)?;
        }

        Command::Rename {
            backup,
            name,
            notes,
        } => {
            let mut record = lookup(manager, &backup)?;
            if let Some(name) = name {
                record.display_name = name;
            }
            if let Some(notes) = notes {
                record.notes = notes;
            }
            manager.update_backup_metadata(&record)?;
            print_record(&record)?;
        }

        Command::Games => {
            for game_id in manager.game_ids_with_backups() {
                let line = serde_json::json!({
                    "gameId": game_id,
                    "gameName": manager.game_name_from_backups(&game_id),
                    "backups": manager.backups_for_game(&game_id).len(),
                });
                println!("{}", line);
            }
        }
    }

    Ok(())
}

fn lookup(manager: &BackupManager, backup: &BackupRef) -> Result<BackupRecord> {
    manager
        .backup_by_id(&backup.game_id, &backup.backup_id)
        .ok_or_else(|| anyhow!("No backup {} for game {}", backup.backup_id, backup.game_id))
}

fn print_record(record: &BackupRecord) -> Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}

/// Wait for a background operation. Ctrl+C requests cancellation; the
/// operation still runs to its completion step.
async fn wait_or_cancel<T>(
    manager: &BackupManager,
    handle: OperationHandle<T>,
) -> std::result::Result<T, EngineError> {
    let wait = handle.wait();
    tokio::pin!(wait);

    tokio::select! {
        result = &mut wait => result,
        interrupted = signal::ctrl_c() => {
            match interrupted {
                Ok(()) => {
                    info!("Interrupted, cancelling the current operation");
                    manager.cancel_operation();
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
            wait.await
        }
    }
}

fn spawn_event_printer(manager: &BackupManager) -> tokio::task::JoinHandle<()> {
    let mut rx = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to encode event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
