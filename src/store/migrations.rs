//! Schema upgrades for the lead ledger file.
//!
//! Older ledgers tracked completion in an `Emailed` column. On first load the
//! file is rewritten with the current header, every row preserved and the old
//! flag's truthy values mapped onto `Done`. A ledger already on the current
//! schema is left untouched.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::error::LedgerError;
use crate::store::ledger::{LeadRecord, is_truthy, write_records};

/// Completion column used by the legacy schema.
pub const LEGACY_DONE_COLUMN: &str = "Emailed";

/// What [`run_migrations`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No ledger file yet.
    NoLedger,
    /// Header already matches the current schema (or is unrecognised).
    UpToDate,
    /// Legacy file rewritten.
    Upgraded { rows: usize },
}

/// Upgrade a legacy ledger in place. Must run before any other ledger operation.
pub fn run_migrations(path: &Path) -> Result<MigrationOutcome, LedgerError> {
    if !path.exists() {
        return Ok(MigrationOutcome::NoLedger);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    if !headers.iter().any(|h| h == LEGACY_DONE_COLUMN) {
        return Ok(MigrationOutcome::UpToDate);
    }

    info!(path = %path.display(), "Migrating ledger from legacy schema");

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field: HashMap<&str, &str> = headers
            .iter()
            .map(String::as_str)
            .zip(row.iter())
            .collect();
        let get = |name: &str| field.get(name).map(|v| v.to_string()).unwrap_or_default();
        let optional = |name: &str| Some(get(name)).filter(|v| !v.is_empty());

        let done = is_truthy(&get(LEGACY_DONE_COLUMN)) || is_truthy(&get("Done"));
        records.push(LeadRecord {
            message_id: get("Message_ID"),
            name: get("Name"),
            email: get("Email"),
            website: get("Website"),
            summary: optional("Summary"),
            document_ref: optional("PDF"),
            done,
        });
    }
    drop(reader);

    write_records(path, &records)?;

    info!(rows = records.len(), "Ledger migrated to current schema");
    Ok(MigrationOutcome::Upgraded {
        rows: records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ledger::LEDGER_HEADERS;

    #[test]
    fn missing_file_is_not_migrated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leads.csv");
        assert_eq!(run_migrations(&path).unwrap(), MigrationOutcome::NoLedger);
        assert!(!path.exists());
    }

    #[test]
    fn legacy_emailed_column_is_mapped_to_done() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leads.csv");
        std::fs::write(
            &path,
            "Message_ID,Name,Email,Website,Summary,PDF,Emailed\n\
             m1,Jane,jane@acme.com,acme.com,A summary,Acme_m1.pdf,Yes\n\
             m2,Bob,bob@beta.io,beta.io,,,\n\
             m3,Ann,ann@gamma.org,gamma.org,,,yes\n",
        )
        .unwrap();

        let outcome = run_migrations(&path).unwrap();
        assert_eq!(outcome, MigrationOutcome::Upgraded { rows: 3 });

        let content = std::fs::read_to_string(&path).unwrap();
        let first_line = content.lines().next().unwrap();
        assert_eq!(first_line, LEDGER_HEADERS.join(","));
        assert!(!content.contains("Emailed"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<LeadRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].done);
        assert_eq!(rows[0].summary.as_deref(), Some("A summary"));
        assert_eq!(rows[0].document_ref.as_deref(), Some("Acme_m1.pdf"));
        assert!(!rows[1].done);
        assert_eq!(rows[1].summary, None);
        assert!(rows[2].done);
    }

    #[test]
    fn current_schema_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leads.csv");
        let original = format!("{}\nm1,Jane,jane@acme.com,acme.com,,,Yes\n", LEDGER_HEADERS.join(","));
        std::fs::write(&path, &original).unwrap();

        assert_eq!(run_migrations(&path).unwrap(), MigrationOutcome::UpToDate);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn migration_runs_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leads.csv");
        std::fs::write(&path, "Message_ID,Name,Email,Website,Emailed\nm1,Jane,j@a.com,a.com,no\n")
            .unwrap();

        assert_eq!(
            run_migrations(&path).unwrap(),
            MigrationOutcome::Upgraded { rows: 1 }
        );
        assert_eq!(run_migrations(&path).unwrap(), MigrationOutcome::UpToDate);
    }
}
