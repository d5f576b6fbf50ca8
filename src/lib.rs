//! Leadflow: answers brochure inquiries with a personalised document.

pub mod channels;
pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod scrape;
pub mod store;
