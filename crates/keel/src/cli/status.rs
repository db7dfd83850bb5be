use anyhow::Result;
use clap::Parser;
use console::style;

use keel::MigrationStatus;

use super::{print_header, GlobalOptions, Session};

/// Show applied and pending migrations.
#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Print machine-readable JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(self, global: &GlobalOptions) -> Result<()> {
        let session = Session::open(global).await?;
        let status = session.runner.status().await;
        session.close().await;
        let status = status?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            print_status(&status);
        }
        Ok(())
    }
}

fn print_status(status: &MigrationStatus) {
    print_header("Migration Status");

    if status.applied.is_empty() && status.pending.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        println!();
        return;
    }

    if !status.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for m in &status.applied {
            let down_marker = if m.reversible {
                style("↓").green().to_string()
            } else {
                style("-").dim().to_string()
            };
            let name = match &m.name {
                Some(name) => style(name.as_str()).cyan().to_string(),
                None => style("(not registered)").yellow().to_string(),
            };
            println!(
                "    {} {} {} {} ({})",
                down_marker,
                style(m.version).bold(),
                name,
                style("at").dim(),
                m.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    if !status.pending.is_empty() {
        if !status.applied.is_empty() {
            println!();
        }
        println!("  {} Pending:", style("○").yellow());
        for m in &status.pending {
            println!(
                "    {} {} {}",
                style("→").dim(),
                style(m.version).bold(),
                style(&m.name).yellow()
            );
        }
    }

    let orphaned = status.orphaned().count();
    println!();
    println!(
        "  {} {} applied, {} pending, {} not registered",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len(),
        orphaned
    );
    println!();

    // Legend
    println!(
        "  {} = has down migration, {} = no down migration",
        style("↓").green(),
        style("-").dim()
    );
    println!();
}
