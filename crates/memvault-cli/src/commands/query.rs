use clap::Parser;
use memvault::MemoryEngine;
use memvault::record::{Record, RecordState};
use memvault::storage::RecordFilter;

use crate::error::CliResult;
use crate::output::{
    OutputFormat, parse_id, parse_metadata, print_history, print_json, print_record,
    print_records,
};

#[derive(Parser)]
pub struct SearchArgs {
    #[clap(help = "Search query")]
    pub query: String,

    #[clap(long, short, default_value = "10", help = "Maximum number of results")]
    pub limit: usize,

    #[clap(long = "type", help = "Only records of this memory type")]
    pub memory_type: Option<String>,

    #[clap(long = "meta", value_name = "KEY=VALUE", help = "Required metadata values")]
    pub metadata: Vec<String>,
}

impl SearchArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let mut filter = RecordFilter::active();
        if let Some(memory_type) = &self.memory_type {
            filter = filter.with_memory_types(vec![memory_type.clone()]);
        }
        for (key, value) in parse_metadata(&self.metadata)? {
            filter = filter.with_metadata(key, value);
        }

        let hits = engine.search(&self.query, self.limit, &filter).await?;

        match format {
            OutputFormat::Json => print_json(&hits)?,
            OutputFormat::Table => {
                if hits.is_empty() {
                    println!("No matching memories.");
                    return Ok(());
                }
                let distances: Vec<Option<f32>> = hits.iter().map(|h| h.distance).collect();
                let records: Vec<Record> = hits.into_iter().map(|h| h.record).collect();
                print_records(&records, Some(&distances));
            }
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct GetArgs {
    #[clap(help = "Memory ID (UUID format)")]
    pub id: String,

    #[clap(long, help = "Count this read as an access")]
    pub touch: bool,
}

impl GetArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let id = parse_id(&self.id)?;
        let record = if self.touch {
            engine.recall(id).await?
        } else {
            engine.get(id).await?
        };

        match format {
            OutputFormat::Json => print_json(&record)?,
            OutputFormat::Table => print_record(&record),
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of memories to display"
    )]
    pub limit: usize,

    #[clap(long, default_value = "0", help = "Number of memories to skip")]
    pub offset: usize,

    #[clap(long, help = "Filter by state (active, superseded, inconsistent)")]
    pub state: Option<RecordState>,
}

impl ListArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let filter = match self.state {
            Some(state) => RecordFilter::new().with_states(vec![state]),
            None => RecordFilter::new(),
        };
        let records = engine.list(&filter, self.limit, self.offset).await?;

        match format {
            OutputFormat::Json => print_json(&records)?,
            OutputFormat::Table => {
                if records.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }
                print_records(&records, None);
                let total = engine.count(&filter).await?;
                println!("\nShowing {} of {total} memories", records.len());
            }
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct HistoryArgs {
    #[clap(help = "Memory ID (UUID format)")]
    pub id: String,
}

impl HistoryArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let id = parse_id(&self.id)?;
        let entries = engine.history(id).await?;

        match format {
            OutputFormat::Json => print_json(&entries)?,
            OutputFormat::Table => {
                if entries.is_empty() {
                    println!("No history for {id}.");
                    return Ok(());
                }
                print_history(&entries);
            }
        }
        Ok(())
    }
}
