use anyhow::Result;
use clap::Parser;
use console::style;

use super::{print_header, report_result, GlobalOptions, Session};

/// Apply pending migrations.
#[derive(Parser, Debug)]
pub struct UpCommand {
    /// Apply at most this many migrations.
    #[arg(long)]
    pub steps: Option<usize>,
}

impl UpCommand {
    pub async fn execute(self, global: &GlobalOptions) -> Result<()> {
        let session = Session::open(global).await?;
        print_header("Migrations");

        if session.keel.registry().is_empty() {
            println!(
                "  {} No migrations found in {}",
                style("ℹ").blue(),
                session.keel.config().migrations.dir
            );
            println!();
            session.close().await;
            return Ok(());
        }

        println!("  {} Running pending migrations...", style("→").dim());
        let result = match self.steps {
            Some(steps) => session.runner.run_up_by(steps).await,
            None => session.runner.run_up().await,
        };

        let outcome = match result {
            Ok(result) => report_result(&session, &result, "Applied"),
            Err(e) => Err(e.into()),
        };
        session.close().await;
        outcome
    }
}
