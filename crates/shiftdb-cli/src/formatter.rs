//! Output formatters for command results.

use crate::error::CliError;
use clap::ValueEnum;
use comfy_table::{Cell, Table};
use shiftdb_core::{FieldKind, LockRecord, MigrationId, SchemaRegistry, StatusReport};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format the migrations a command applied or reverted.
    fn format_migrations(&self, action: &str, ids: &[MigrationId]) -> Result<String, CliError>;

    /// Format a status report.
    fn format_status(&self, status: &StatusReport) -> Result<String, CliError>;

    /// Format the live schema.
    fn format_schema(&self, registry: &SchemaRegistry) -> Result<String, CliError>;

    /// Format the outcome of clearing the lock.
    fn format_unlock(&self, released: Option<&LockRecord>) -> Result<String, CliError>;

    /// Format an error for stderr.
    fn format_error(&self, error: &CliError) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_migrations(&self, action: &str, ids: &[MigrationId]) -> Result<String, CliError> {
        if ids.is_empty() {
            return Ok(format!("Nothing {}", action));
        }

        let mut table = Table::new();
        table.set_header(vec!["#", "Migration"]);
        for (i, id) in ids.iter().enumerate() {
            table.add_row(vec![Cell::new(i + 1), Cell::new(id)]);
        }
        Ok(format!("{} {} migration(s)\n{}", capitalize(action), ids.len(), table))
    }

    fn format_status(&self, status: &StatusReport) -> Result<String, CliError> {
        let mut table = Table::new();
        table.set_header(vec!["Migration", "State", "Applied at"]);

        for applied in &status.applied {
            table.add_row(vec![
                Cell::new(&applied.id),
                Cell::new("applied"),
                Cell::new(format_timestamp(applied.applied_at)),
            ]);
        }
        for pending in &status.pending {
            table.add_row(vec![Cell::new(pending), Cell::new("pending"), Cell::new("")]);
        }

        let lock = match &status.lock {
            Some(record) => format!(
                "Lock: held by {} since {}",
                record.owner,
                format_timestamp(record.acquired_at)
            ),
            None => "Lock: free".to_string(),
        };

        Ok(format!(
            "{}\n{} applied, {} pending. {}",
            table,
            status.applied.len(),
            status.pending.len(),
            lock
        ))
    }

    fn format_schema(&self, registry: &SchemaRegistry) -> Result<String, CliError> {
        if registry.is_empty() {
            return Ok("No record types".to_string());
        }

        let mut table = Table::new();
        table.set_header(vec!["Record type", "Field", "Kind", "Details"]);
        for record_type in registry.iter() {
            for field in record_type.fields() {
                table.add_row(vec![
                    Cell::new(&record_type.name),
                    Cell::new(&field.name),
                    Cell::new(field.kind.name()),
                    Cell::new(field_details(&field.kind)),
                ]);
            }
        }
        Ok(table.to_string())
    }

    fn format_unlock(&self, released: Option<&LockRecord>) -> Result<String, CliError> {
        Ok(match released {
            Some(record) => format!(
                "Released migration lock held by {} since {}",
                record.owner,
                format_timestamp(record.acquired_at)
            ),
            None => "Migration lock was not held".to_string(),
        })
    }

    fn format_error(&self, error: &CliError) -> String {
        let mut output = format!("Error [{}]: {}", error.kind(), error);
        if let Some(migration) = error.migration() {
            output.push_str(&format!("\n  migration: {}", migration));
        }
        if let Some(index) = error.operation_index() {
            output.push_str(&format!("\n  operation: {}", index));
        }
        output
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_migrations(&self, action: &str, ids: &[MigrationId]) -> Result<String, CliError> {
        let mut obj = serde_json::Map::new();
        obj.insert(action.to_string(), serde_json::to_value(ids)?);
        Ok(serde_json::to_string_pretty(&serde_json::Value::Object(obj))?)
    }

    fn format_status(&self, status: &StatusReport) -> Result<String, CliError> {
        Ok(serde_json::to_string_pretty(status)?)
    }

    fn format_schema(&self, registry: &SchemaRegistry) -> Result<String, CliError> {
        Ok(serde_json::to_string_pretty(registry)?)
    }

    fn format_unlock(&self, released: Option<&LockRecord>) -> Result<String, CliError> {
        let value = serde_json::json!({ "released": released });
        Ok(serde_json::to_string_pretty(&value)?)
    }

    fn format_error(&self, error: &CliError) -> String {
        serde_json::json!({
            "error": error.kind(),
            "message": error.to_string(),
            "migration": error.migration().map(|m| m.as_str()),
            "operation_index": error.operation_index(),
        })
        .to_string()
    }
}

fn field_details(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Bitfield(spec) => format!(
            "{} flags, int{}, default {:#x}",
            spec.flags.len(),
            spec.width().bits(),
            spec.storage_default()
        ),
        FieldKind::Text {
            max_length: Some(n),
        } => format!("max {}", n),
        FieldKind::Text { max_length: None } | FieldKind::Boolean => String::new(),
        FieldKind::Integer { bits } => format!("int{}", bits),
    }
}

/// Format a microsecond timestamp as UTC.
fn format_timestamp(micros: u64) -> String {
    let secs = (micros / 1_000_000) as i64;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftdb_core::{BitfieldSpec, DefaultMask, FieldSpec, RecordTypeSpec};

    fn id(raw: &str) -> MigrationId {
        raw.parse().unwrap()
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(1_700_000_000_000_000), "2023-11-14 22:13:20 UTC");
    }

    #[test]
    fn test_table_migrations() {
        let output = TableFormatter
            .format_migrations("applied", &[id("0001_initial"), id("0395_mero_guru_realm")])
            .unwrap();
        assert!(output.starts_with("Applied 2 migration(s)"));
        assert!(output.contains("0395_mero_guru_realm"));
        assert_eq!(
            TableFormatter.format_migrations("applied", &[]).unwrap(),
            "Nothing applied"
        );
    }

    #[test]
    fn test_json_migrations() {
        let output = JsonFormatter
            .format_migrations("reverted", &[id("0002_stream")])
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["reverted"][0], "0002_stream");
    }

    #[test]
    fn test_schema_details() {
        let registry = SchemaRegistry::new().with_record_type(
            RecordTypeSpec::new("realm").with_field(FieldSpec::bitfield(
                "authentication_methods",
                BitfieldSpec::new(["Google", "Email"]).with_default(DefaultMask::AllEnabled),
            )),
        );
        let output = TableFormatter.format_schema(&registry).unwrap();
        assert!(output.contains("authentication_methods"));
        assert!(output.contains("2 flags, int32, default 0x7fffffff"));
    }

    #[test]
    fn test_json_error_fields() {
        let error = CliError::from(shiftdb_core::MigrationError::IrreversibleMigration {
            migration: id("0002_raw"),
            operation_index: 0,
        });
        let value: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_error(&error)).unwrap();
        assert_eq!(value["error"], "irreversible_migration");
        assert_eq!(value["migration"], "0002_raw");
        assert_eq!(value["operation_index"], 0);

        let text = TableFormatter.format_error(&error);
        assert!(text.starts_with("Error [irreversible_migration]"));
        assert!(text.contains("migration: 0002_raw"));
    }
}
