use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use console::style;

use keel::keel_runtime::migrations::MigrationGenerator;

use super::{print_header, GlobalOptions};

/// Create a new migration.
#[derive(Parser, Debug)]
pub struct NewCommand {
    /// Migration name, e.g. `add_users`.
    pub name: String,

    /// Only create the up file.
    #[arg(long)]
    pub irreversible: bool,
}

impl NewCommand {
    pub async fn execute(self, global: &GlobalOptions) -> Result<()> {
        let dir = global.resolve_migrations_dir()?;
        let generated =
            MigrationGenerator::new(&dir).create(&self.name, !self.irreversible, Utc::now())?;

        print_header("New Migration");
        println!(
            "  {} Created {}",
            style("✓").green(),
            style(generated.up_path.display()).cyan()
        );
        if let Some(down_path) = &generated.down_path {
            println!(
                "  {} Created {}",
                style("✓").green(),
                style(down_path.display()).cyan()
            );
        }
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_writes_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = GlobalOptions {
            config: "/nonexistent/keel.toml".into(),
            migrations_dir: Some(dir.path().to_string_lossy().to_string()),
            database_url: None,
        };

        NewCommand {
            name: "add users".into(),
            irreversible: false,
        }
        .execute(&global)
        .await
        .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("_add_users.down.sql"));
        assert!(names[1].ends_with("_add_users.up.sql"));
    }

    #[tokio::test]
    async fn test_new_fails_on_broken_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = dir.path().join("keel.toml");
        std::fs::write(&config, "not = [valid").unwrap();
        let global = GlobalOptions {
            config: config.to_string_lossy().to_string(),
            migrations_dir: None,
            database_url: None,
        };

        let result = NewCommand {
            name: "add users".into(),
            irreversible: false,
        }
        .execute(&global)
        .await;
        assert!(result.is_err());
    }
}
