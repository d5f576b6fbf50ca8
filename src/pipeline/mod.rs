//! Lead pipeline.
//!
//! The newest inbound message flows through:
//! 1. `Classifier::classify()`: deny-list, contact, keyword and website checks
//! 2. `Ledger::upsert()`: the lead is recorded before any work is done
//! 3. `Enricher::enrich()`: website research via the LLM
//! 4. `DocumentEngine`: template fill and conversion
//! 5. Reply with the document, then `Ledger::mark_done()`

pub mod classifier;
pub mod enrichment;
pub mod orchestrator;
pub mod types;

pub use classifier::{Classifier, ClassifierConfig};
pub use enrichment::Enricher;
pub use orchestrator::{Collaborators, Orchestrator};
pub use types::{Classification, CycleOutcome, EnrichmentResult, InboundMessage, Stage};
