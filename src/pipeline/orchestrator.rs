//! The poll loop: one lead at a time, from inbox to delivered document.
//!
//! Each cycle looks at the newest inbox message only. Everything before the
//! reply is safe to redo, so a failed lead is simply picked up again if it
//! resurfaces as the newest message. The reply and `mark_done` are the only
//! non-repeatable steps and run strictly in that order; the ledger's done
//! flag is checked first so a delivered lead is never answered twice.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::channels::{ChatNotifier, MailProvider, ReplyRequest};
use crate::config::PipelineConfig;
use crate::document::{DocumentConverter, DocumentEngine, TemplateFields};
use crate::error::{FatalEnvironmentError, LedgerError, PipelineError};
use crate::llm::LlmProvider;
use crate::notify::NotificationBuffer;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::enrichment::Enricher;
use crate::pipeline::types::{CycleOutcome, InboundMessage, Stage};
use crate::scrape::WebsiteFetcher;
use crate::store::Ledger;

/// External services the orchestrator drives.
pub struct Collaborators {
    pub mail: Arc<dyn MailProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub fetcher: Arc<dyn WebsiteFetcher>,
    pub converter: Arc<dyn DocumentConverter>,
    /// Receives a copy of every deliverable when set.
    pub chat: Option<Arc<dyn ChatNotifier>>,
}

/// `Re: <subject>`, keeping an existing `Re:` and using `fallback` for an empty subject.
pub fn reply_subject(original: &str, fallback: &str) -> String {
    let original = original.trim();
    if original.is_empty() {
        return fallback.to_string();
    }
    let already_reply = original
        .get(..3)
        .is_some_and(|p| p.eq_ignore_ascii_case("re:"));
    if already_reply {
        original.to_string()
    } else {
        format!("Re: {original}")
    }
}

/// Letter accompanying the document.
pub fn reply_body(contact_name: &str, company_name: &str, reply_from: &str, our_company: &str) -> String {
    let contact = if reply_from.is_empty() {
        String::new()
    } else {
        format!("Feel free to reach out to me at {reply_from} if you have any questions.\n\n")
    };
    format!(
        "Hello {contact_name},\n\n\
         I am writing to you regarding {company_name}'s business opportunities and growth \
         potential. I'm attaching a personalized brochure for you to review.\n\n\
         {contact}\
         Thank you for your consideration!\n\n\
         Best regards,\n\
         {our_company}"
    )
}

pub struct Orchestrator {
    config: PipelineConfig,
    mail: Arc<dyn MailProvider>,
    chat: Option<Arc<dyn ChatNotifier>>,
    classifier: Classifier,
    ledger: Ledger,
    enricher: Enricher,
    documents: DocumentEngine,
    notifications: Arc<NotificationBuffer>,
}

impl Orchestrator {
    /// Wire up the pipeline. Opens (and if needed migrates) the ledger.
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        notifications: Arc<NotificationBuffer>,
    ) -> Result<Self, LedgerError> {
        let ledger = Ledger::open(&config.paths.ledger)?;
        let enricher = Enricher::new(
            collaborators.llm,
            collaborators.fetcher,
            config.company_name.clone(),
        );
        let documents = DocumentEngine::new(
            &config.paths.template,
            &config.paths.output_dir,
            collaborators.converter,
        );

        Ok(Self {
            classifier: Classifier::new(config.classifier.clone()),
            config,
            mail: collaborators.mail,
            chat: collaborators.chat,
            ledger,
            enricher,
            documents,
            notifications,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Log a stage transition and mirror it to the chat channel.
    fn narrate(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        self.notifications.enqueue(line);
    }

    /// Log a failure and mirror it to the chat channel.
    fn alarm(&self, line: impl Into<String>) {
        let line = line.into();
        error!("{line}");
        self.notifications.enqueue(line);
    }

    /// Run one poll cycle.
    ///
    /// `Err` means the cycle could not proceed at all (fetch or ledger
    /// unavailable) or the environment cannot ever complete a lead
    /// ([`PipelineError::Fatal`]). Stage failures for a lead come back as
    /// [`CycleOutcome::Failed`].
    pub async fn run_cycle(&self) -> Result<CycleOutcome, PipelineError> {
        let Some(message) = self
            .mail
            .fetch_latest()
            .await
            .map_err(PipelineError::Fetch)?
        else {
            return Ok(CycleOutcome::Idle);
        };
        let message_id = message.id.clone();

        if self.ledger.is_done(&message_id)? {
            self.narrate(format!("Latest message {message_id} already handled"));
            return Ok(CycleOutcome::AlreadyDone { message_id });
        }

        let verdict = self.classifier.classify(&message);
        if !verdict.qualifies {
            let reason = if verdict.is_system_message {
                "automated sender"
            } else {
                "not a brochure inquiry"
            };
            self.narrate(format!("Message {message_id} does not qualify ({reason})"));
            return Ok(CycleOutcome::Disqualified { message_id });
        }

        self.narrate(format!(
            "New lead: {} <{}> ({})",
            verdict.contact_name, verdict.contact_email, verdict.candidate_website
        ));
        self.ledger.upsert(
            &message_id,
            &verdict.contact_name,
            &verdict.contact_email,
            &verdict.candidate_website,
        )?;

        self.process_lead(&message, &verdict.contact_name, &verdict.contact_email, &verdict.candidate_website)
            .await
    }

    async fn process_lead(
        &self,
        message: &InboundMessage,
        contact_name: &str,
        contact_email: &str,
        website: &str,
    ) -> Result<CycleOutcome, PipelineError> {
        let message_id = message.id.as_str();
        let failed = |stage: Stage| CycleOutcome::Failed {
            message_id: message_id.to_string(),
            stage,
        };

        // Enrichment
        self.narrate(format!("Researching {website}"));
        let enrichment = match self.enricher.enrich(website).await {
            Ok(e) => e,
            Err(e) => {
                self.alarm(format!("Enrichment failed for {website}: {e}"));
                return Ok(failed(Stage::Enrichment));
            }
        };
        self.narrate(format!("Identified company: {}", enrichment.company_name));
        if let Err(e) = self.ledger.update_summary(message_id, &enrichment.summary) {
            warn!(message_id, error = %e, "Could not record summary");
        }

        // Rendering
        let fields = TemplateFields {
            name: contact_name,
            company_name: &enrichment.company_name,
            company_description: &enrichment.company_description,
        };
        let filled = match self
            .documents
            .render(message_id, &fields, &enrichment.service_blurbs)
        {
            Ok(path) => path,
            Err(e) => {
                self.alarm(format!("Document generation failed: {e}"));
                return Ok(failed(Stage::Rendering));
            }
        };

        // Conversion
        let deliverable = match self.documents.convert(&filled).await {
            Ok(path) => path,
            Err(e) if e.is_fatal() => {
                self.alarm(format!("Stopping: {e}"));
                return Err(e.into());
            }
            Err(e) => {
                self.alarm(format!("Conversion failed: {e}"));
                return Ok(failed(Stage::Conversion));
            }
        };
        let document = file_name(&deliverable);
        self.narrate(format!("Document ready: {document}"));
        if let Err(e) = self.ledger.update_document(message_id, &document) {
            warn!(message_id, error = %e, "Could not record document");
        }
        self.mirror_to_chat(&deliverable).await;

        // Delivery
        let reply = ReplyRequest {
            to: contact_email.to_string(),
            subject: reply_subject(&message.subject, &self.config.fallback_subject),
            body: reply_body(
                contact_name,
                &enrichment.company_name,
                &self.config.reply_from,
                &self.config.company_name,
            ),
            attachment: deliverable.clone(),
            in_reply_to: message_id.to_string(),
            thread_id: message.thread_id.clone(),
        };
        if let Err(e) = self.mail.send_reply(&reply).await {
            self.alarm(format!("Reply to {contact_email} failed: {e}"));
            return Ok(failed(Stage::Delivery));
        }

        match self.ledger.mark_done(message_id) {
            Ok(_) => {
                self.narrate(format!("Delivered {document} to {contact_email}"));
                Ok(CycleOutcome::Delivered {
                    message_id: message_id.to_string(),
                    document,
                })
            }
            Err(e) => {
                self.alarm(format!(
                    "Reply sent to {contact_email} but the lead could not be marked done: {e}"
                ));
                Ok(failed(Stage::Ledger))
            }
        }
    }

    async fn mirror_to_chat(&self, deliverable: &Path) {
        if let Some(chat) = &self.chat
            && let Err(e) = chat.send_file(deliverable).await
        {
            warn!(channel = chat.name(), error = %e, "Could not mirror document to chat");
        }
    }

    /// Poll until `shutdown` resolves or a fatal environment error occurs.
    ///
    /// Errors and panics inside a cycle are logged and the loop carries on
    /// after the usual interval. `shutdown` is only observed between cycles:
    /// a cycle in progress always finishes, so a reply is never separated
    /// from its `mark_done`.
    pub async fn run<S>(&self, shutdown: S) -> Result<(), FatalEnvironmentError>
    where
        S: Future<Output = ()>,
    {
        let completed = self
            .ledger
            .records()
            .map(|r| r.iter().filter(|l| l.done).count())
            .unwrap_or(0);
        self.narrate(format!(
            "Lead pipeline started: {completed} leads delivered so far, polling every {}s",
            self.config.poll_interval.as_secs()
        ));

        tokio::pin!(shutdown);
        loop {
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(outcome)) => {
                    tracing::debug!(outcome = outcome.label(), "Cycle finished");
                }
                Ok(Err(PipelineError::Fatal(fatal))) => return Err(fatal),
                Ok(Err(e)) => {
                    self.alarm(format!("Cycle aborted: {e}"));
                }
                Err(_) => {
                    // Details and backtrace were logged by the panic hook.
                    self.alarm("Cycle panicked, continuing with the next poll");
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    self.narrate("Lead pipeline stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_gets_single_re_prefix() {
        assert_eq!(reply_subject("Brochure request", "Fallback"), "Re: Brochure request");
        assert_eq!(reply_subject("RE: Brochure", "Fallback"), "RE: Brochure");
        assert_eq!(reply_subject("re:x", "Fallback"), "re:x");
        assert_eq!(reply_subject("  ", "Fallback"), "Fallback");
    }

    #[test]
    fn body_names_contact_company_and_sender() {
        let body = reply_body("Jane", "Acme", "sales@ourorg.com", "Our Organization");
        assert!(body.starts_with("Hello Jane,"));
        assert!(body.contains("Acme's business opportunities"));
        assert!(body.contains("sales@ourorg.com"));
        assert!(body.ends_with("Best regards,\nOur Organization"));
    }

    #[test]
    fn body_without_reply_address_skips_contact_line() {
        let body = reply_body("Jane", "Acme", "", "Us");
        assert!(!body.contains("reach out"));
    }
}
