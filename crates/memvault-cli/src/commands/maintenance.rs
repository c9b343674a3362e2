use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::MemoryEngine;
use memvault::bootstrap::{decay_scheduler, spawn_decay};
use memvault::config::Config;
use memvault::decay::DecayReport;
use memvault::reconcile::ReconcileReport;
use memvault::storage::RecordFilter;

use crate::error::CliResult;
use crate::output::{OutputFormat, parse_id, parse_metadata, print_json};

fn print_counts(rows: &[(&str, usize)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["Metric", "Count"]);
    for (label, count) in rows {
        table.add_row([label.to_string(), count.to_string()]);
    }
    println!("{table}");
}

fn print_decay(report: &DecayReport) {
    print_counts(&[
        ("Examined", report.examined),
        ("Decayed", report.decayed),
        ("Expired", report.expired),
        ("Skipped", report.skipped),
        ("Failed", report.failed),
    ]);
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[clap(
        required_unless_present = "all",
        conflicts_with = "all",
        help = "Memory ID to delete (UUID format)"
    )]
    pub id: Option<String>,

    #[clap(long, requires = "metadata", help = "Delete every memory matching --meta")]
    pub all: bool,

    #[clap(
        long = "meta",
        value_name = "KEY=VALUE",
        requires = "all",
        help = "Metadata values a memory must carry to be deleted"
    )]
    pub metadata: Vec<String>,
}

impl DeleteArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let Some(raw) = &self.id else {
            return self.delete_matching(engine, format).await;
        };
        let id = parse_id(raw)?;
        let removed = engine.delete(id).await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "id": removed.id,
                "deleted": true,
            }))?,
            OutputFormat::Table => println!("Memory {id} deleted successfully."),
        }
        Ok(())
    }

    async fn delete_matching(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let mut filter = RecordFilter::new();
        for (key, value) in parse_metadata(&self.metadata)? {
            filter = filter.with_metadata(key, value);
        }
        let deleted = engine.delete_all(&filter).await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({ "deleted": deleted }))?,
            OutputFormat::Table => println!("Deleted {deleted} matching memories."),
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct ResetArgs {
    #[clap(long, help = "Confirm deleting every record and all history")]
    pub yes: bool,
}

impl ResetArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        if !self.yes {
            return Err("Refusing to reset without --yes".into());
        }
        engine.reset().await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({ "reset": true }))?,
            OutputFormat::Table => println!("All memories and history removed."),
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct DecayArgs {}

impl DecayArgs {
    pub async fn execute(
        &self,
        engine: &MemoryEngine,
        config: &Config,
        format: OutputFormat,
    ) -> CliResult<()> {
        let scheduler = decay_scheduler(engine, config)?;
        let report = scheduler.run_tick().await?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => print_decay(&report),
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct ReconcileArgs {}

impl ReconcileArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let report: ReconcileReport = engine.reconcile().await?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => print_counts(&[
                ("Repaired", report.repaired),
                ("Re-indexed", report.reindexed),
                ("Embedded", report.embedded),
                ("Dangling removed", report.dangling_removed),
                ("Failed", report.failed),
            ]),
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct WatchArgs {
    #[clap(long, help = "Run one tick immediately before waiting for the interval")]
    pub now: bool,
}

impl WatchArgs {
    pub async fn execute(
        &self,
        engine: &MemoryEngine,
        config: &Config,
        format: OutputFormat,
    ) -> CliResult<()> {
        if self.now {
            let report = decay_scheduler(engine, config)?.run_tick().await?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => print_decay(&report),
            }
        }

        let handle = spawn_decay(engine, config)?
            .ok_or("Decay is disabled; set `enabled = true` under [decay]")?;
        println!(
            "Decay scheduler running every {}s. Press Ctrl+C to stop.",
            config.decay.interval_secs
        );
        tokio::signal::ctrl_c().await?;
        handle.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_takes_an_id_or_a_metadata_match() {
        let by_id = DeleteArgs::try_parse_from(["delete", "0190a5a8-7c3e-7b1a-9d3e-000000000001"])
            .unwrap();
        assert!(by_id.id.is_some());
        assert!(!by_id.all);

        let matching =
            DeleteArgs::try_parse_from(["delete", "--all", "--meta", "user_id=alice"]).unwrap();
        assert!(matching.id.is_none());
        assert_eq!(matching.metadata, vec!["user_id=alice".to_string()]);
    }

    #[test]
    fn test_delete_all_requires_a_match() {
        assert!(DeleteArgs::try_parse_from(["delete"]).is_err());
        assert!(DeleteArgs::try_parse_from(["delete", "--all"]).is_err());
        assert!(DeleteArgs::try_parse_from(["delete", "--meta", "user_id=alice"]).is_err());
    }
}
