//! Shared types for the lead pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Inbound message ─────────────────────────────────────────────────

/// The newest message in the inbox, as handed over by the mail provider.
///
/// Immutable once fetched; never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider-assigned identifier, stable and unique per message.
    pub id: String,
    /// Raw sender: `"Name <address>"` or a bare address. Empty if absent.
    pub sender: String,
    /// Subject line (may be empty).
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Conversation thread the message belongs to, for reply threading.
    pub thread_id: Option<String>,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Convenience constructor used by channel adapters and tests.
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            thread_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Verdict of the classifier. Derived fresh per message, never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Matched the automated-sender deny-list.
    pub is_system_message: bool,
    /// Actionable inquiry that should be enriched and answered.
    pub qualifies: bool,
    pub contact_name: String,
    pub contact_email: String,
    /// First website found, in extraction order. Empty when none.
    pub candidate_website: String,
}

impl Classification {
    /// Verdict for a message rejected by the deny-list.
    pub fn system() -> Self {
        Self {
            is_system_message: true,
            ..Self::default()
        }
    }
}

// ── Enrichment ──────────────────────────────────────────────────────

/// Number of service blurbs every document carries.
pub const BLURB_COUNT: usize = 5;

/// Output of the enrichment stage for one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// Single-paragraph narrative of the claimed website.
    pub summary: String,
    pub company_name: String,
    /// One sentence, always starting with "providing ".
    pub company_description: String,
    /// Exactly [`BLURB_COUNT`] ordered blurbs.
    pub service_blurbs: Vec<String>,
}

// ── Cycle outcome ───────────────────────────────────────────────────

/// Stage at which a poll cycle gave up on a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ledger,
    Enrichment,
    Rendering,
    Conversion,
    Delivery,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ledger => "ledger",
            Self::Enrichment => "enrichment",
            Self::Rendering => "rendering",
            Self::Conversion => "conversion",
            Self::Delivery => "delivery",
        }
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Inbox empty.
    Idle,
    /// The latest message was already delivered in an earlier cycle.
    AlreadyDone { message_id: String },
    /// The latest message is not an actionable inquiry.
    Disqualified { message_id: String },
    /// The lead stays `done=false`; it may be retried if it resurfaces.
    Failed { message_id: String, stage: Stage },
    /// Document delivered and lead marked done.
    Delivered {
        message_id: String,
        document: String,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AlreadyDone { .. } => "already_done",
            Self::Disqualified { .. } => "disqualified",
            Self::Failed { .. } => "failed",
            Self::Delivered { .. } => "delivered",
        }
    }
}
