//! `ReadVault` administration CLI.
//!
//! Applies the schema and manages accounts and reader keys on the
//! configured backend.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use readvault_core::Driver;
use readvault_core::config::{Config, load_config};
use readvault_core::tracing_init::init_tracing;
use readvault_server::auth::JwtManager;
use readvault_server::service::{AccountService, KeyRequest, KeyService, bootstrap};
use readvault_server::storage::{AccountLookup, AccountType, Database, Key, open_database};

#[derive(Parser, Debug)]
#[command(name = "readvault")]
#[command(version, about = "ReadVault - timing read storage administration")]
struct Cli {
    /// Settings file (defaults to ~/.config/readvault/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database driver: sqlite, postgres or mysql.
    #[arg(long, global = true)]
    db_driver: Option<Driver>,

    /// Path to the SQLite database file.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Connection URL for Postgres or MySQL.
    #[arg(long, global = true)]
    db_url: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply the schema and create the admin account on an empty store.
    Migrate,
    /// Manage accounts.
    #[command(subcommand)]
    Account(AccountCommand),
    /// Manage reader keys.
    #[command(subcommand)]
    Key(KeyCommand),
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Create an account.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "READVAULT_ACCOUNT_PASSWORD", hide_env_values = true)]
        password: String,
        /// free, paid or admin.
        #[arg(long = "type", default_value = "free")]
        account_type: String,
    },
    /// List active accounts.
    List,
    /// Clear the lock left by repeated failed logins.
    Unlock { email: String },
    /// Soft-delete an account and all of its keys.
    Delete { email: String },
    /// Restore the most recently deleted account with this email.
    Resurrect { email: String },
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
    /// Create a key for an account.
    Add {
        /// Owning account email.
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        reader: String,
        /// read, write or delete.
        #[arg(long = "type", default_value = "write")]
        scope: String,
        /// RFC 3339 expiration; omit for a key that never expires.
        #[arg(long)]
        valid_until: Option<String>,
    },
    /// List an account's active keys.
    List { email: String },
    /// Soft-delete a key.
    Delete {
        value: String,
        /// Also remove every read uploaded with the key.
        #[arg(long)]
        purge_reads: bool,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(driver) = self.db_driver {
            config.database.driver = Some(driver);
        }
        if let Some(path) = &self.db_path {
            config.database.path = Some(path.clone());
        }
        if let Some(url) = &self.db_url {
            config.database.url = Some(url.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing("readvault=info,readvault_server=info", cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    let db = open_database(&config).await?;
    info!(driver = %db.driver(), "Database opened");

    let result = run(cli.command, &config, Arc::clone(&db)).await;
    db.close().await;
    result
}

async fn run(command: Commands, config: &Config, db: Arc<dyn Database>) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    match command {
        Commands::Migrate => {
            bootstrap(db.as_ref(), &config.admin).await?;
            writeln!(out, "schema at version {}", db.schema_version().await)?;
        }
        Commands::Account(cmd) => {
            db.ensure_schema().await?;
            run_account(cmd, config, db, &mut out).await?;
        }
        Commands::Key(cmd) => {
            db.ensure_schema().await?;
            run_key(cmd, db, &mut out).await?;
        }
    }
    Ok(())
}

async fn run_account(
    command: AccountCommand,
    config: &Config,
    db: Arc<dyn Database>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        AccountCommand::Add {
            name,
            email,
            password,
            account_type,
        } => {
            let jwt = Arc::new(JwtManager::from_config(&config.auth));
            let accounts = AccountService::new(db, jwt);
            let account_type: AccountType = account_type.parse()?;
            let account = accounts
                .create_account(&name, &email, &password, account_type)
                .await?;
            writeln!(out, "created account {} <{}>", account.id, account.email)?;
        }
        AccountCommand::List => {
            for account in db.list_accounts().await? {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}{}",
                    account.id,
                    account.email,
                    account.name,
                    account.account_type,
                    if account.locked { "\tlocked" } else { "" }
                )?;
            }
        }
        AccountCommand::Unlock { email } => {
            let account = db.get_account(AccountLookup::Email(&email)).await?;
            db.unlock_account(&account).await?;
            writeln!(out, "unlocked {email}")?;
        }
        AccountCommand::Delete { email } => {
            let account = db.get_account(AccountLookup::Email(&email)).await?;
            db.delete_account(account.id).await?;
            writeln!(out, "deleted {email}")?;
        }
        AccountCommand::Resurrect { email } => {
            let account = db.resurrect_account(&email).await?;
            writeln!(out, "restored account {} <{}>", account.id, account.email)?;
        }
    }
    Ok(())
}

async fn run_key(
    command: KeyCommand,
    db: Arc<dyn Database>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let keys = KeyService::new(db);
    match command {
        KeyCommand::Add {
            email,
            name,
            reader,
            scope,
            valid_until,
        } => {
            let request = KeyRequest {
                name,
                scope,
                reader_name: reader,
                valid_until,
            };
            let key = keys.add_key(&email, &request).await?;
            print_key(out, &key)?;
        }
        KeyCommand::List { email } => {
            for key in keys.list_keys(&email).await? {
                print_key(out, &key)?;
            }
        }
        KeyCommand::Delete { value, purge_reads } => {
            let purged = keys.delete_key(&value, purge_reads).await?;
            writeln!(out, "deleted key, {purged} reads purged")?;
        }
    }
    Ok(())
}

fn print_key(out: &mut impl Write, key: &Key) -> std::io::Result<()> {
    let expires = key
        .valid_until
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map_or_else(|| "never".to_string(), |when| when.to_rfc3339());
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}",
        key.value, key.reader_name, key.scope, key.name, expires
    )
}
