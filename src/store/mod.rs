//! Persistence layer: the CSV lead ledger and its schema upgrades.

pub mod ledger;
pub mod migrations;

pub use ledger::{LeadRecord, Ledger};
