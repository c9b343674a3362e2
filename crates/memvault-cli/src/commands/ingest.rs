use clap::Parser;
use memvault::record::Importance;
use memvault::{AddOptions, InferOptions, MemoryEngine};

use crate::error::CliResult;
use crate::output::{OutputFormat, parse_metadata, print_json, print_record};

#[derive(Parser)]
pub struct InferArgs {
    #[clap(help = "Statement to remember, revise or retract")]
    pub text: String,

    #[clap(long = "type", help = "Memory type for newly created records")]
    pub memory_type: Option<String>,

    #[clap(long, help = "Memory sub type for newly created records")]
    pub sub_type: Option<String>,

    #[clap(
        long = "meta",
        value_name = "KEY=VALUE",
        help = "Metadata; user_id, agent_id and run_id also scope retrieval"
    )]
    pub metadata: Vec<String>,
}

impl InferArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let options = InferOptions {
            memory_type: self.memory_type.clone(),
            sub_type: self.sub_type.clone(),
            metadata: parse_metadata(&self.metadata)?,
        };
        let record = engine.infer_with(&self.text, options).await?;

        match format {
            OutputFormat::Json => print_json(&record)?,
            OutputFormat::Table => {
                println!("{} {}", record.operation(), record.id);
                print_record(&record);
            }
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Memory content text")]
    pub text: String,

    #[clap(long, help = "Importance from 1 to 10 (default from config)")]
    pub importance: Option<i64>,

    #[clap(long = "type", help = "Memory type")]
    pub memory_type: Option<String>,

    #[clap(long, help = "Memory sub type")]
    pub sub_type: Option<String>,

    #[clap(long = "meta", value_name = "KEY=VALUE", help = "Metadata")]
    pub metadata: Vec<String>,
}

impl AddArgs {
    pub async fn execute(&self, engine: &MemoryEngine, format: OutputFormat) -> CliResult<()> {
        let importance = self
            .importance
            .map(Importance::new)
            .transpose()
            .map_err(|e| e.to_string())?;
        let options = AddOptions {
            importance,
            memory_type: self.memory_type.clone(),
            sub_type: self.sub_type.clone(),
            metadata: parse_metadata(&self.metadata)?,
        };
        let record = engine.add(&self.text, options).await?;

        match format {
            OutputFormat::Json => print_json(&record)?,
            OutputFormat::Table => {
                println!("Memory created successfully.");
                println!("ID: {}", record.id);
                if !record.is_indexed() {
                    println!("Stored without an embedding; run `memvault reconcile` to index it.");
                }
            }
        }
        Ok(())
    }
}
