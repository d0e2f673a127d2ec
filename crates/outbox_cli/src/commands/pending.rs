//! Pending command implementation.

use super::{fold_log, load, require_store, CliError, Format};
use outbox_core::{MutationRecord, MUTATIONS_FILE};
use serde::Serialize;
use std::path::Path;

/// One pending mutation, as listed.
#[derive(Debug, Serialize)]
pub struct PendingRow {
    /// Mutation id.
    pub id: String,
    /// Write kind.
    pub kind: String,
    /// Target collection.
    pub collection: String,
    /// Target row.
    pub entity_id: String,
    /// Base server version, if any.
    pub base_version: Option<u64>,
    /// Failed delivery attempts.
    pub attempts: u32,
    /// When it was queued (Unix millis).
    pub queued_at: u64,
    /// Names of the written fields.
    pub fields: Vec<String>,
}

/// Runs the pending command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), CliError> {
    let format = Format::parse(format)?;
    let rows = list(path, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text => {
            if rows.is_empty() {
                println!("No pending mutations");
            }
            for (i, row) in rows.iter().enumerate() {
                println!(
                    "{:>4}  {}  {:<6} {}/{}  base={}  attempts={}  fields=[{}]",
                    i + 1,
                    row.id,
                    row.kind,
                    row.collection,
                    row.entity_id,
                    row.base_version
                        .map_or_else(|| "-".to_string(), |v| v.to_string()),
                    row.attempts,
                    row.fields.join(", ")
                );
            }
        }
    }
    Ok(())
}

/// Lists pending mutations, oldest first.
pub fn list(path: &Path, limit: Option<usize>) -> Result<Vec<PendingRow>, CliError> {
    require_store(path)?;
    let Some(log) = load::<MutationRecord>(&path.join(MUTATIONS_FILE))? else {
        return Ok(Vec::new());
    };
    Ok(fold_log(&log.replay.records)
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|m| PendingRow {
            id: m.id.to_string(),
            kind: m.kind.to_string(),
            collection: m.collection,
            entity_id: m.entity_id.to_string(),
            base_version: m.base_version.map(|v| v.0),
            attempts: m.attempts,
            queued_at: m.queued_at,
            fields: m.data.into_keys().collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_store;
    use tempfile::tempdir;

    #[test]
    fn lists_in_queue_order() {
        let dir = tempdir().unwrap();
        let (first, second) = sample_store(dir.path());

        let rows = list(dir.path(), None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, first.mutation_id.to_string());
        assert_eq!(rows[1].id, second.mutation_id.to_string());
        assert_eq!(rows[2].fields, vec!["title".to_string()]);

        assert_eq!(list(dir.path(), Some(1)).unwrap().len(), 1);
    }
}
