//! Argo CLI - command line interface for the secure document container.
//!
//! Exercises the container file service: inspect footers, save and open
//! datasets, change passwords, and create or restore encrypted backups.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use argo_common::SecretBytes;
use argo_container::FileService;
use argo_crypto::{password, KdfParams};

#[derive(Parser)]
#[command(name = "argo")]
#[command(about = "Argo - secure document container management")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// KDF strength for new saves: "interactive", "moderate", or "sensitive".
    #[arg(long, default_value = "interactive")]
    strength: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the unencrypted footer of a container file.
    Info {
        /// Container file.
        file: PathBuf,
    },

    /// Save a JSON dataset into a container file.
    Save {
        /// Destination container file.
        file: PathBuf,

        /// JSON file holding the dataset.
        #[arg(short, long)]
        input: PathBuf,

        /// Company/display name recorded in the footer.
        #[arg(short, long)]
        name: String,

        /// Encrypt the container (prompts for a password).
        #[arg(short, long)]
        encrypt: bool,
    },

    /// Open a container file and print (or write) its dataset as JSON.
    Open {
        /// Container file.
        file: PathBuf,

        /// Write the dataset here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Change the password of an encrypted container.
    Passwd {
        /// Container file.
        file: PathBuf,
    },

    /// Create an encrypted backup of a directory.
    Backup {
        /// Directory to back up.
        source: PathBuf,

        /// Destination backup file.
        dest: PathBuf,

        /// Display name recorded in the backup footer.
        #[arg(short, long)]
        name: String,
    },

    /// Restore an encrypted backup into a directory.
    Restore {
        /// Backup file.
        source: PathBuf,

        /// Destination directory.
        dest: PathBuf,
    },

    /// Check a password against the policy and show its strength score.
    CheckPassword,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let kdf_params = match cli.strength.as_str() {
        "interactive" => KdfParams::interactive(),
        "moderate" => KdfParams::moderate(),
        "sensitive" => KdfParams::sensitive(),
        other => bail!("Unknown KDF strength: {}", other),
    };
    let service = FileService::new().with_kdf_params(kdf_params);

    // Ctrl-C cancels the operation in flight; a cancelled save leaves the
    // previous file untouched.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    match cli.command {
        Commands::Info { file } => {
            let footer = service.peek_footer(&file).await?;
            println!("Name:      {}", footer.display_name);
            println!("Kind:      {:?}", footer.kind);
            println!("Encrypted: {}", footer.is_encrypted);
            println!("Created:   {}", footer.created_at);
            println!("Updated:   {}", footer.updated_at);
        }

        Commands::Save {
            file,
            input,
            name,
            encrypt,
        } => {
            let json = std::fs::read_to_string(&input)
                .with_context(|| format!("Cannot read {}", input.display()))?;
            let dataset: serde_json::Value =
                serde_json::from_str(&json).context("Input is not valid JSON")?;

            let password = if encrypt {
                Some(prompt_new_password()?)
            } else {
                None
            };

            service
                .save(&file, &name, &dataset, password.as_ref(), &token)
                .await?;
            info!(file = %file.display(), "Saved");
        }

        Commands::Open { file, output } => {
            let footer = service.peek_footer(&file).await?;
            let password = if footer.is_encrypted {
                Some(prompt_password("Password: ")?)
            } else {
                None
            };

            let dataset: serde_json::Value =
                service.open(&file, password.as_ref(), &token).await?;
            let json = serde_json::to_string_pretty(&dataset)?;

            match output {
                Some(path) => std::fs::write(&path, json)?,
                None => println!("{}", json),
            }
        }

        Commands::Passwd { file } => {
            let old = prompt_password("Current password: ")?;
            let new = prompt_new_password()?;
            service.change_password(&file, &old, &new, &token).await?;
            info!(file = %file.display(), "Password changed");
        }

        Commands::Backup { source, dest, name } => {
            let password = prompt_new_password()?;
            service
                .create_backup(&source, &dest, &name, &password, &token)
                .await?;
            info!(dest = %dest.display(), "Backup created");
        }

        Commands::Restore { source, dest } => {
            let password = prompt_password("Password: ")?;
            service
                .restore_backup(&source, &dest, &password, &token)
                .await?;
            info!(dest = %dest.display(), "Backup restored");
        }

        Commands::CheckPassword => {
            let candidate = rpassword::prompt_password("Password to check: ")?;
            let violations = password::validate(&candidate);
            if violations.is_empty() {
                println!("Password meets the policy.");
            } else {
                for rule in &violations {
                    println!("Violation: {}", rule);
                }
            }
            println!("Strength: {}/100", password::strength_score(&candidate));
        }
    }

    Ok(())
}

fn prompt_password(prompt: &str) -> Result<SecretBytes> {
    let raw = rpassword::prompt_password(prompt)?;
    Ok(SecretBytes::from(raw))
}

/// Prompt for a new password, enforcing the policy and a confirmation.
fn prompt_new_password() -> Result<SecretBytes> {
    let first = rpassword::prompt_password("New password: ")?;

    let violations = password::validate(&first);
    if !violations.is_empty() {
        let rules: Vec<String> = violations.iter().map(|r| r.to_string()).collect();
        bail!("Password rejected: {}", rules.join("; "));
    }

    let second = rpassword::prompt_password("Repeat password: ")?;
    if first != second {
        bail!("Passwords do not match");
    }

    Ok(SecretBytes::from(first))
}
