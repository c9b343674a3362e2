use chrono::{DateTime, Utc};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::record::{HistoryEntry, Record};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CliResult;

#[derive(Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

pub fn parse_id(raw: &str) -> CliResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| format!("Invalid UUID format: {e}").into())
}

/// Parse repeated `key=value` flags. Values that parse as JSON keep their
/// type; anything else is a string.
pub fn parse_metadata(pairs: &[String]) -> CliResult<Map<String, Value>> {
    let mut metadata = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected key=value, got `{pair}`"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Empty metadata key in `{pair}`").into());
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn print_record(record: &Record) {
    let mut table = table();
    table.set_header(["Property", "Value"]);

    let now = Utc::now();
    table.add_row(["ID", &record.id.to_string()]);
    table.add_row(["Content", &record.content]);
    table.add_row(["Operation", record.operation().as_str()]);
    table.add_row(["State", record.state().as_str()]);
    table.add_row(["Importance", &record.importance.to_string()]);
    table.add_row(["Strength", &format!("{:.2}", record.strength(now))]);
    table.add_row(["Type", &record.memory_type]);
    table.add_row(["Sub Type", &record.sub_type]);
    table.add_row(["Created", &record.created_at.to_rfc3339()]);
    table.add_row(["Updated", &record.updated_at.to_rfc3339()]);
    table.add_row(["Last Accessed", &record.accessed_at.to_rfc3339()]);
    table.add_row(["Access Count", &record.access_count.to_string()]);
    table.add_row(["Decay Rate", &format!("{:.3}", record.decay_rate)]);
    table.add_row([
        "Previous",
        &record.previous_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row([
        "Superseded By",
        &record
            .superseded_by()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row([
        "Embedding",
        &record
            .embedding
            .as_ref()
            .map(|e| format!("{} dims", e.len()))
            .unwrap_or_else(|| "none".to_string()),
    ]);
    if !record.metadata.is_empty() {
        table.add_row(["Metadata", &Value::Object(record.metadata.clone()).to_string()]);
    }

    println!("{table}");
}

/// One row per record; `distances` lines up with `records` when present.
pub fn print_records(records: &[Record], distances: Option<&[Option<f32>]>) {
    let mut table = table();
    let mut header = vec!["ID", "Content", "Importance", "State", "Type", "Updated"];
    if distances.is_some() {
        header.push("Similarity");
    }
    table.set_header(header);

    for (position, record) in records.iter().enumerate() {
        let mut row = vec![
            truncate_string(&record.id.to_string(), 8),
            truncate_string(&record.content, 50),
            record.importance.to_string(),
            record.state().to_string(),
            record.memory_type.clone(),
            format_timestamp(&record.updated_at),
        ];
        if let Some(distances) = distances {
            row.push(
                distances
                    .get(position)
                    .copied()
                    .flatten()
                    .map(|d| format!("{:.3}", 1.0 - d))
                    .unwrap_or_else(|| "keyword".to_string()),
            );
        }
        table.add_row(row);
    }

    println!("{table}");
}

pub fn print_history(entries: &[HistoryEntry]) {
    let mut table = table();
    table.set_header(["#", "Operation", "Actor", "Outcome", "When", "Detail"]);

    for entry in entries {
        let detail = entry
            .detail
            .clone()
            .or_else(|| entry.related_id.map(|id| format!("related {id}")))
            .or_else(|| entry.new_content.as_deref().map(|c| truncate_string(c, 40)))
            .unwrap_or_default();
        table.add_row([
            entry.sequence.to_string(),
            entry.operation.to_string(),
            entry.actor.to_string(),
            entry.outcome.to_string(),
            format_timestamp(&entry.timestamp),
            detail,
        ]);
    }

    println!("{table}");
}
