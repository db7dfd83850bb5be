mod down;
mod new;
mod revert;
mod status;
mod up;

pub use down::DownCommand;
pub use new::NewCommand;
pub use revert::RevertCommand;
pub use status::StatusCommand;
pub use up::UpCommand;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use keel::keel_core::config::LoggingConfig;
use keel::{Database, Keel, KeelConfig, MigrationRunner, RunResult};

/// keel - versioned schema migrations
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Configuration file path.
    #[arg(short, long, default_value = "keel.toml", global = true)]
    pub config: String,

    /// Migrations directory (overrides `[migrations].dir`).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<String>,

    /// Database URL (overrides `[database].url`).
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations.
    Up(UpCommand),

    /// Roll back the most recent migrations.
    Down(DownCommand),

    /// Roll back specific versions.
    Revert(RevertCommand),

    /// Show applied and pending migrations.
    Status(StatusCommand),

    /// Create a new migration.
    New(NewCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        match self.command {
            Commands::Up(cmd) => cmd.execute(&self.global).await,
            Commands::Down(cmd) => cmd.execute(&self.global).await,
            Commands::Revert(cmd) => cmd.execute(&self.global).await,
            Commands::Status(cmd) => cmd.execute(&self.global).await,
            Commands::New(cmd) => cmd.execute(&self.global).await,
        }
    }
}

impl GlobalOptions {
    /// Load the configuration file and apply command-line overrides.
    ///
    /// Without a config file, `--database-url` or `DATABASE_URL` is enough.
    pub fn load_config(&self) -> Result<KeelConfig> {
        let mut config = if Path::new(&self.config).exists() {
            KeelConfig::from_file(&self.config)?
        } else if let Some(url) = self
            .database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
        {
            KeelConfig::default_with_database_url(&url)
        } else {
            anyhow::bail!(
                "Configuration file not found: {}\nCreate one or pass --database-url.",
                self.config
            );
        };

        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations.dir = dir.clone();
        }
        Ok(config)
    }

    /// Migrations directory without requiring a database configuration.
    ///
    /// A config file that exists but does not parse is an error.
    pub fn resolve_migrations_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.migrations_dir {
            return Ok(PathBuf::from(dir));
        }
        if !Path::new(&self.config).exists() {
            return Ok(PathBuf::from("migrations"));
        }
        let config = KeelConfig::from_file(&self.config)?;
        Ok(PathBuf::from(config.migrations.dir))
    }
}

/// Initialize tracing from `RUST_LOG`, falling back to the configured level.
pub(crate) fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.json_format {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Cancel the returned token on Ctrl-C; a second Ctrl-C exits immediately.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        let mut presses = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            if on_interrupt(presses, &child) {
                std::process::exit(130);
            }
        }
    });
    token
}

/// React to the `presses`-th Ctrl-C. Returns true when the process should exit.
fn on_interrupt(presses: usize, token: &CancellationToken) -> bool {
    if presses == 1 {
        tracing::warn!(
            "Received Ctrl-C, stopping after the current migration (press again to abort)"
        );
        token.cancel();
        false
    } else {
        tracing::warn!("Received second Ctrl-C, aborting");
        true
    }
}

/// A connected runner plus the state needed to report on it.
pub(crate) struct Session {
    pub keel: Keel,
    pub db: Database,
    pub runner: MigrationRunner,
}

impl Session {
    /// Load config, start logging, discover migrations and connect.
    pub async fn open(global: &GlobalOptions) -> Result<Self> {
        let config = global.load_config()?;
        init_logging(&config.logging);

        let keel = Keel::builder()
            .config(config)
            .cancellation(cancel_on_ctrl_c())
            .build()?;

        let db = keel.connect().await?;
        let runner = keel.runner(Arc::new(db.datastore()))?;

        Ok(Self { keel, db, runner })
    }

    /// Name of a registered version, for display.
    pub fn name_of(&self, version: keel::Version) -> String {
        self.keel
            .registry()
            .get(version)
            .map(|unit| unit.name().to_string())
            .unwrap_or_default()
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

pub(crate) fn print_header(title: &str) {
    println!();
    println!(
        "  {}  {} {}",
        style("⚓").bold(),
        style("KEEL").bold().cyan(),
        title
    );
    println!();
}

/// Print the outcome of a run; a failed run becomes an error exit.
pub(crate) fn report_result(session: &Session, result: &RunResult, verb: &str) -> Result<()> {
    for version in &result.versions {
        println!(
            "  {} {} {} {}",
            style("✓").green(),
            verb,
            style(version).cyan(),
            session.name_of(*version)
        );
    }

    if let Some(failure) = &result.failure {
        println!(
            "  {} {} {} ({})",
            style("✗").red(),
            style(failure.version).red().bold(),
            session.name_of(failure.version),
            style(failure.kind()).red()
        );
        println!("    {}", failure.error);
        println!();
        anyhow::bail!("{}", failure);
    }

    if result.versions.is_empty() {
        println!("  {} Nothing to do", style("ℹ").blue());
    } else {
        println!();
        println!(
            "  {} {} migration(s) {}",
            style("✓").green(),
            result.versions.len(),
            verb.to_lowercase()
        );
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_up() {
        let cli = Cli::try_parse_from(["keel", "up"]).unwrap();
        assert!(matches!(cli.command, Commands::Up(UpCommand { steps: None })));
        assert_eq!(cli.global.config, "keel.toml");
    }

    #[test]
    fn test_cli_parse_up_steps() {
        let cli = Cli::try_parse_from(["keel", "up", "--steps", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Up(UpCommand { steps: Some(2) })));
    }

    #[test]
    fn test_cli_parse_down_default() {
        let cli = Cli::try_parse_from(["keel", "down"]).unwrap();
        assert!(matches!(cli.command, Commands::Down(DownCommand { count: 1 })));
    }

    #[test]
    fn test_cli_parse_revert() {
        let cli = Cli::try_parse_from(["keel", "revert", "20240101120000", "K3"]).unwrap();
        match cli.command {
            Commands::Revert(cmd) => assert_eq!(
                cmd.versions,
                vec![keel::Version::new(20240101120000), keel::Version::new(3)]
            ),
            _ => panic!("expected revert"),
        }
    }

    #[test]
    fn test_cli_parse_revert_requires_versions() {
        assert!(Cli::try_parse_from(["keel", "revert"]).is_err());
        assert!(Cli::try_parse_from(["keel", "revert", "abc"]).is_err());
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "keel",
            "status",
            "--json",
            "--database-url",
            "postgres://localhost/app",
            "-m",
            "db/migrations",
        ])
        .unwrap();
        assert_eq!(
            cli.global.database_url.as_deref(),
            Some("postgres://localhost/app")
        );
        assert_eq!(cli.global.migrations_dir.as_deref(), Some("db/migrations"));
        assert!(matches!(cli.command, Commands::Status(StatusCommand { json: true })));
    }

    #[test]
    fn test_cli_parse_new() {
        let cli = Cli::try_parse_from(["keel", "new", "add_users", "--irreversible"]).unwrap();
        match cli.command {
            Commands::New(cmd) => {
                assert_eq!(cmd.name, "add_users");
                assert!(cmd.irreversible);
            }
            _ => panic!("expected new"),
        }
    }

    #[test]
    fn test_load_config_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(
            &path,
            "[database]\nurl = \"postgres://file/db\"\n\n[migrations]\ndir = \"sql\"\n",
        )
        .unwrap();

        let global = GlobalOptions {
            config: path.to_string_lossy().to_string(),
            migrations_dir: Some("other".into()),
            database_url: Some("postgres://flag/db".into()),
        };
        let config = global.load_config().unwrap();
        assert_eq!(config.database.url, "postgres://flag/db");
        assert_eq!(config.migrations.dir, "other");
    }

    #[test]
    fn test_resolve_migrations_dir_without_config() {
        let global = GlobalOptions {
            config: "/nonexistent/keel.toml".into(),
            migrations_dir: None,
            database_url: None,
        };
        assert_eq!(
            global.resolve_migrations_dir().unwrap(),
            PathBuf::from("migrations")
        );
    }

    #[test]
    fn test_resolve_migrations_dir_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(
            &path,
            "[database]\nurl = \"postgres://file/db\"\n\n[migrations]\ndir = \"db/sql\"\n",
        )
        .unwrap();

        let global = GlobalOptions {
            config: path.to_string_lossy().to_string(),
            migrations_dir: None,
            database_url: None,
        };
        assert_eq!(global.resolve_migrations_dir().unwrap(), PathBuf::from("db/sql"));
    }

    #[test]
    fn test_resolve_migrations_dir_invalid_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "[migrations\ndir = ").unwrap();

        let global = GlobalOptions {
            config: path.to_string_lossy().to_string(),
            migrations_dir: None,
            database_url: None,
        };
        assert!(global.resolve_migrations_dir().is_err());

        // An explicit directory does not need the config file.
        let global = GlobalOptions {
            migrations_dir: Some("sql".into()),
            ..global
        };
        assert_eq!(global.resolve_migrations_dir().unwrap(), PathBuf::from("sql"));
    }

    #[test]
    fn test_interrupt_cancels_then_exits() {
        let token = CancellationToken::new();

        assert!(!on_interrupt(1, &token));
        assert!(token.is_cancelled());

        assert!(on_interrupt(2, &token));
        assert!(on_interrupt(3, &token));
    }
}
