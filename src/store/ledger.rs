//! Lead ledger: one CSV row per distinct inbound message identifier.
//!
//! The ledger is what makes delivery at-most-once across restarts: a record
//! flips `done=false → done=true` exactly once, after the reply went out, and
//! the orchestrator never reprocesses a done identifier.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::store::migrations::{self, MigrationOutcome};

/// Column order of the current schema.
pub const LEDGER_HEADERS: [&str; 7] = [
    "Message_ID",
    "Name",
    "Email",
    "Website",
    "Summary",
    "PDF",
    "Done",
];

/// A persisted lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    #[serde(rename = "Message_ID")]
    pub message_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "Website", default)]
    pub website: String,
    /// Filled after enrichment.
    #[serde(rename = "Summary", default)]
    pub summary: Option<String>,
    /// Deliverable filename, filled after conversion.
    #[serde(rename = "PDF", default)]
    pub document_ref: Option<String>,
    #[serde(rename = "Done", with = "done_flag", default)]
    pub done: bool,
}

impl LeadRecord {
    pub fn new(message_id: &str, name: &str, email: &str, website: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            website: website.to_string(),
            summary: None,
            document_ref: None,
            done: false,
        }
    }
}

/// `Done` is stored as `Yes` or an empty cell.
mod done_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(done: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *done { "Yes" } else { "" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().is_some_and(super::is_truthy))
    }
}

/// Truthy flag values accepted from current and legacy files.
pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "1"
    )
}

/// Rewrite the ledger file with `records`, header first.
///
/// Writes to a sibling temp file and renames it over the original so a crash
/// mid-write never leaves a truncated ledger.
pub(crate) fn write_records(path: &Path, records: &[LeadRecord]) -> Result<(), LedgerError> {
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        writer.write_record(LEDGER_HEADERS)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush().map_err(|source| LedgerError::Io {
            path: tmp.clone(),
            source,
        })?;
    }
    fs::rename(&tmp, path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// File-backed lead ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open (creating if needed) the ledger at `path`.
    ///
    /// Legacy schemas are upgraded before anything else touches the file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match migrations::run_migrations(&path)? {
            MigrationOutcome::Upgraded { rows } => {
                info!(rows, path = %path.display(), "Ledger upgraded");
            }
            MigrationOutcome::NoLedger => {
                write_records(&path, &[])?;
                info!(path = %path.display(), "Created new ledger");
            }
            MigrationOutcome::UpToDate => {}
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in file order.
    pub fn records(&self) -> Result<Vec<LeadRecord>, LedgerError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        reader
            .deserialize()
            .collect::<Result<Vec<LeadRecord>, csv::Error>>()
            .map_err(LedgerError::from)
    }

    pub fn find(&self, message_id: &str) -> Result<Option<LeadRecord>, LedgerError> {
        Ok(self
            .records()?
            .into_iter()
            .find(|r| r.message_id == message_id))
    }

    pub fn exists(&self, message_id: &str) -> Result<bool, LedgerError> {
        Ok(self.find(message_id)?.is_some())
    }

    pub fn is_done(&self, message_id: &str) -> Result<bool, LedgerError> {
        Ok(self.find(message_id)?.is_some_and(|r| r.done))
    }

    /// Insert a record for `message_id` unless one exists.
    ///
    /// The first classification wins: an existing record is left untouched.
    /// Returns `true` when a record was created.
    pub fn upsert(
        &self,
        message_id: &str,
        name: &str,
        email: &str,
        website: &str,
    ) -> Result<bool, LedgerError> {
        let mut records = self.records()?;
        if records.iter().any(|r| r.message_id == message_id) {
            debug!(message_id, "Lead already in ledger");
            return Ok(false);
        }
        records.push(LeadRecord::new(message_id, name, email, website));
        write_records(&self.path, &records)?;
        Ok(true)
    }

    /// Record the enrichment summary. Returns `false` if no record matched.
    pub fn update_summary(&self, message_id: &str, summary: &str) -> Result<bool, LedgerError> {
        self.update(message_id, |r| r.summary = Some(summary.to_string()))
    }

    /// Record the deliverable's filename. Returns `false` if no record matched.
    pub fn update_document(&self, message_id: &str, document: &str) -> Result<bool, LedgerError> {
        self.update(message_id, |r| r.document_ref = Some(document.to_string()))
    }

    /// Mark a lead delivered. Idempotent; a no-op for unknown identifiers.
    pub fn mark_done(&self, message_id: &str) -> Result<bool, LedgerError> {
        self.update(message_id, |r| r.done = true)
    }

    fn update<F>(&self, message_id: &str, apply: F) -> Result<bool, LedgerError>
    where
        F: FnOnce(&mut LeadRecord),
    {
        let mut records = self.records()?;
        let Some(record) = records.iter_mut().find(|r| r.message_id == message_id) else {
            debug!(message_id, "No ledger record to update");
            return Ok(false);
        };
        apply(record);
        write_records(&self.path, &records)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Ledger) {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(tmp.path().join("data/qualified_leads.csv")).unwrap();
        (tmp, ledger)
    }

    #[test]
    fn open_creates_file_with_header() {
        let (_tmp, ledger) = open_temp();
        let content = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.trim_end(), LEDGER_HEADERS.join(","));
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn upsert_twice_yields_one_record() {
        let (_tmp, ledger) = open_temp();
        assert!(ledger.upsert("m1", "Jane", "jane@acme.com", "acme.com").unwrap());
        assert!(!ledger.upsert("m1", "Other", "other@x.com", "x.com").unwrap());

        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Jane");
        assert_eq!(records[0].website, "acme.com");
    }

    #[test]
    fn upsert_does_not_touch_progress_fields() {
        let (_tmp, ledger) = open_temp();
        ledger.upsert("m1", "Jane", "jane@acme.com", "acme.com").unwrap();
        ledger.update_summary("m1", "Acme builds widgets.").unwrap();
        ledger.mark_done("m1").unwrap();
        ledger.upsert("m1", "Jane", "jane@acme.com", "acme.com").unwrap();

        let record = ledger.find("m1").unwrap().unwrap();
        assert_eq!(record.summary.as_deref(), Some("Acme builds widgets."));
        assert!(record.done);
    }

    #[test]
    fn mark_done_is_idempotent() {
        let (_tmp, ledger) = open_temp();
        ledger.upsert("m1", "Jane", "jane@acme.com", "acme.com").unwrap();
        assert!(!ledger.is_done("m1").unwrap());

        assert!(ledger.mark_done("m1").unwrap());
        assert!(ledger.mark_done("m1").unwrap());
        assert!(ledger.is_done("m1").unwrap());
        assert_eq!(ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn mark_done_unknown_is_noop() {
        let (_tmp, ledger) = open_temp();
        assert!(!ledger.mark_done("missing").unwrap());
        assert!(!ledger.exists("missing").unwrap());
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn fields_with_commas_and_quotes_round_trip() {
        let (_tmp, ledger) = open_temp();
        ledger.upsert("m1", "Doe, Jane", "jane@acme.com", "acme.com").unwrap();
        ledger
            .update_summary("m1", "Acme \"widgets\", gadgets\nand more")
            .unwrap();
        ledger.update_document("m1", "Acme_m1.pdf").unwrap();

        let record = ledger.find("m1").unwrap().unwrap();
        assert_eq!(record.name, "Doe, Jane");
        assert_eq!(record.summary.as_deref(), Some("Acme \"widgets\", gadgets\nand more"));
        assert_eq!(record.document_ref.as_deref(), Some("Acme_m1.pdf"));
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leads.csv");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.upsert("m1", "Jane", "jane@acme.com", "acme.com").unwrap();
            ledger.mark_done("m1").unwrap();
        }
        let reopened = Ledger::open(&path).unwrap();
        assert!(reopened.is_done("m1").unwrap());
    }

    #[test]
    fn unreadable_ledger_reports_error() {
        let (_tmp, ledger) = open_temp();
        fs::remove_file(ledger.path()).unwrap();
        assert!(ledger.is_done("m1").is_err());
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("Yes"));
        assert!(is_truthy(" yes "));
        assert!(is_truthy("TRUE"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("no"));
    }
}
