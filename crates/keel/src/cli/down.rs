use anyhow::Result;
use clap::Parser;
use console::style;

use super::{print_header, report_result, GlobalOptions, Session};

/// Roll back the most recent migrations.
#[derive(Parser, Debug)]
pub struct DownCommand {
    /// Number of migrations to roll back.
    #[arg(default_value = "1")]
    pub count: usize,
}

impl DownCommand {
    pub async fn execute(self, global: &GlobalOptions) -> Result<()> {
        let session = Session::open(global).await?;
        print_header("Migrations");

        if self.count == 0 {
            println!("  {} Nothing to roll back (count=0)", style("ℹ").blue());
            println!();
            session.close().await;
            return Ok(());
        }

        println!(
            "  {} Rolling back {} migration(s)...",
            style("→").dim(),
            self.count
        );

        let outcome = match session.runner.run_down(Some(self.count)).await {
            Ok(result) => report_result(&session, &result, "Reverted"),
            Err(e) => Err(e.into()),
        };
        session.close().await;
        outcome
    }
}
