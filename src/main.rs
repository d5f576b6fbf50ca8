use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;

use leadflow::channels::{ChatNotifier, ImapSmtpMailbox, TelegramNotifier};
use leadflow::config::Config;
use leadflow::document::SubprocessConverter;
use leadflow::llm::{create_provider, probe_connection};
use leadflow::notify::{self, NotificationBuffer};
use leadflow::pipeline::{Collaborators, Orchestrator};
use leadflow::scrape::HttpFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::from_env().context("Invalid configuration")?;
    let _log_guards = leadflow::logging::init(&config.pipeline.paths)?;

    eprintln!("📬 Leadflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Inbox: {}", config.email.imap_host);
    eprintln!("   Ledger: {}", config.pipeline.paths.ledger.display());
    eprintln!("   Template: {}", config.pipeline.paths.template.display());
    eprintln!(
        "   Telegram: {}",
        if config.telegram.is_some() { "enabled" } else { "disabled" }
    );

    // ── LLM ─────────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    if let Err(e) = probe_connection(llm.as_ref()).await {
        tracing::error!(error = %e, "LLM connection test failed");
        anyhow::bail!("LLM connection test failed: {e}");
    }

    // ── Notifications ───────────────────────────────────────────────────
    let (chat, notifications) = match &config.telegram {
        Some(tg) => {
            let notifier: Arc<dyn ChatNotifier> = Arc::new(TelegramNotifier::new(tg));
            let buffer = NotificationBuffer::new(Arc::clone(&notifier), tg.max_message_length);
            (Some(notifier), Arc::new(buffer))
        }
        None => (None, Arc::new(NotificationBuffer::disabled())),
    };
    let flush_interval = config
        .telegram
        .as_ref()
        .map(|tg| tg.buffer_interval)
        .unwrap_or(config.pipeline.poll_interval);
    let (flusher, flusher_shutdown) = notify::spawn_flusher(Arc::clone(&notifications), flush_interval);

    // ── Pipeline ────────────────────────────────────────────────────────
    let collaborators = Collaborators {
        mail: Arc::new(ImapSmtpMailbox::new(config.email.clone())),
        llm,
        fetcher: Arc::new(HttpFetcher::new()),
        converter: Arc::new(SubprocessConverter::new(config.pipeline.converter.clone())),
        chat,
    };
    let orchestrator = Orchestrator::new(config.pipeline.clone(), collaborators, Arc::clone(&notifications))
        .context("Failed to open the lead ledger")?;

    // Listen from the start so an interrupt mid-cycle still stops the loop cleanly.
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received");
                let _ = stop_tx.send(());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ctrl-C handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    });
    let result = orchestrator
        .run(async {
            let _ = stop_rx.await;
        })
        .await;

    flusher_shutdown.store(true, Ordering::Relaxed);
    flusher.abort();
    notifications.flush().await;

    if let Err(fatal) = result {
        tracing::error!(error = %fatal, "Terminating");
        drop(_log_guards);
        std::process::exit(1);
    }
    Ok(())
}
