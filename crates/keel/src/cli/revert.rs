use anyhow::Result;
use clap::Parser;
use console::style;

use keel::Version;

use super::{print_header, report_result, GlobalOptions, Session};

/// Roll back specific versions, newest first.
#[derive(Parser, Debug)]
pub struct RevertCommand {
    /// Versions to roll back. Versions that are not applied are skipped.
    #[arg(required = true, num_args = 1..)]
    pub versions: Vec<Version>,
}

impl RevertCommand {
    pub async fn execute(self, global: &GlobalOptions) -> Result<()> {
        let session = Session::open(global).await?;
        print_header("Migrations");

        for version in &self.versions {
            if !session.keel.registry().contains(*version) {
                println!(
                    "  {} {} is not a known migration, skipping",
                    style("!").yellow(),
                    version
                );
            }
        }

        let outcome = match session.runner.revert(&self.versions).await {
            Ok(result) => report_result(&session, &result, "Reverted"),
            Err(e) => Err(e.into()),
        };
        session.close().await;
        outcome
    }
}
