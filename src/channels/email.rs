//! Email mail provider: IMAP for the newest inbound message, SMTP via lettre
//! for threaded replies with an attachment.

use std::io::{Read, Write as IoWrite};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::channels::{MailProvider, ReplyRequest};
use crate::error::ChannelError;
use crate::pipeline::types::InboundMessage;
use crate::scrape::html_to_text;

// ── Configuration ───────────────────────────────────────────────────

/// Email configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP (inbound) + SMTP (outbound) mailbox.
pub struct ImapSmtpMailbox {
    config: Arc<EmailConfig>,
}

impl ImapSmtpMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl MailProvider for ImapSmtpMailbox {
    async fn fetch_latest(&self) -> Result<Option<InboundMessage>, ChannelError> {
        let cfg = Arc::clone(&self.config);
        let raw = tokio::task::spawn_blocking(move || fetch_latest_imap(&cfg))
            .await
            .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))?
            .map_err(|e| fetch_failed(e.to_string()))?;

        Ok(raw.and_then(|bytes| parse_inbound(&bytes)))
    }

    async fn send_reply(&self, reply: &ReplyRequest) -> Result<(), ChannelError> {
        let cfg = Arc::clone(&self.config);
        let reply = reply.clone();
        tokio::task::spawn_blocking(move || send_reply_smtp(&cfg, &reply))
            .await
            .map_err(|e| send_failed(format!("SMTP task panicked: {e}")))?
    }
}

fn fetch_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::FetchFailed {
        name: "email".into(),
        reason: reason.into(),
    }
}

fn send_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::SendFailed {
        name: "email".into(),
        reason: reason.into(),
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// Send a threaded reply with one attachment via SMTP (blocking).
fn send_reply_smtp(config: &EmailConfig, reply: &ReplyRequest) -> Result<(), ChannelError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::relay(&config.smtp_host)
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    let email = build_reply_message(config, reply)?;

    transport
        .send(&email)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;

    tracing::info!(to = %reply.to, "Reply email sent");
    Ok(())
}

/// Build the MIME reply: plain-text body plus the attachment, with
/// `In-Reply-To`/`References` so it threads under the original.
pub fn build_reply_message(
    config: &EmailConfig,
    reply: &ReplyRequest,
) -> Result<Message, ChannelError> {
    let file_bytes = std::fs::read(&reply.attachment).map_err(|e| {
        send_failed(format!(
            "Cannot read attachment {}: {e}",
            reply.attachment.display()
        ))
    })?;
    let file_name = reply
        .attachment
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string();
    let content_type = ContentType::parse(attachment_mime(&reply.attachment))
        .map_err(|e| send_failed(format!("Invalid content type: {e}")))?;

    let in_reply_to = angle_bracket(&reply.in_reply_to);
    let references = match reply.thread_id.as_deref() {
        Some(root) if root != reply.in_reply_to => format!("{} {}", angle_bracket(root), in_reply_to),
        _ => in_reply_to.clone(),
    };

    Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
        )
        .to(reply
            .to
            .parse()
            .map_err(|e| send_failed(format!("Invalid to address: {e}")))?)
        .subject(reply.subject.clone())
        .in_reply_to(in_reply_to)
        .references(references)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(reply.body.clone()))
                .singlepart(Attachment::new(file_name).body(file_bytes, content_type)),
        )
        .map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

fn attachment_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

fn angle_bracket(id: &str) -> String {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{id}>")
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Turn a raw RFC 822 message into an [`InboundMessage`].
pub fn parse_inbound(raw: &[u8]) -> Option<InboundMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) if !name.trim().is_empty() => {
                format!("{} <{}>", name.trim(), address)
            }
            (_, Some(address)) => address.to_string(),
            _ => String::new(),
        })
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or_default().to_string();
    let body = extract_body(&parsed);
    let id = parsed
        .message_id()
        .map(|s| s.trim_matches(['<', '>']).to_string())
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    let thread_id = header_value(raw, "References")
        .and_then(|refs| message_ids(&refs).into_iter().next())
        .unwrap_or_else(|| id.clone());

    let received_at = parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(
                        u32::from(d.hour),
                        u32::from(d.minute),
                        u32::from(d.second),
                    )
                })
        })
        .map(|naive| naive.and_utc())
        .unwrap_or_else(chrono::Utc::now);

    Some(InboundMessage {
        id,
        sender,
        subject,
        body,
        thread_id: Some(thread_id),
        received_at,
    })
}

/// Plain-text body, falling back to the HTML part rendered as text.
fn extract_body(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return html_to_text(html.as_ref()).trim().to_string();
    }
    String::new()
}

/// Unfolded value of a top-level header, read straight from the raw message.
fn header_value(raw: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let header_block = text
        .split("\r\n\r\n")
        .next()
        .and_then(|h| h.split("\n\n").next())
        .unwrap_or_default();

    let prefix = format!("{}:", name.to_ascii_lowercase());
    let mut value: Option<String> = None;
    for line in header_block.lines() {
        match value.as_mut() {
            Some(v) if line.starts_with([' ', '\t']) => {
                v.push(' ');
                v.push_str(line.trim());
            }
            Some(_) => break,
            None if line.to_ascii_lowercase().starts_with(&prefix) => {
                value = Some(line[prefix.len()..].trim().to_string());
            }
            None => {}
        }
    }
    value
}

/// `<id>` tokens of a `References`-style header, brackets removed.
fn message_ids(header: &str) -> Vec<String> {
    header
        .split('<')
        .skip(1)
        .filter_map(|part| part.split_once('>').map(|(id, _)| id.trim().to_string()))
        .filter(|id| !id.is_empty())
        .collect()
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for IMAP fetch operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Minimal tagged-command IMAP session over TLS.
struct ImapSession {
    tls: TlsStream,
    tag_counter: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag_counter: 0,
        };
        let _greeting = session.read_line()?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(buf);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a command; returns untagged text lines, any literals, and the tagged status line.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ImapError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);
        self.tls.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.tls.flush()?;

        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            let text = String::from_utf8_lossy(&line).to_string();
            if text.starts_with(&format!("{tag} ")) {
                response.status = text;
                return Ok(response);
            }
            if let Some(size) = literal_size(&text) {
                let mut literal = vec![0u8; size];
                self.tls.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            response.lines.push(text);
        }
    }
}

#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    status: String,
}

impl ImapResponse {
    fn is_ok(&self) -> bool {
        self.status.split_whitespace().nth(1) == Some("OK")
    }
}

/// `{N}` at the end of a response line announces an N-byte literal.
fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let open = trimmed.strip_suffix('}')?.rfind('{')?;
    trimmed[open + 1..trimmed.len() - 1].parse().ok()
}

/// Message count from a `* N EXISTS` line.
fn exists_count(lines: &[String]) -> Option<u32> {
    lines.iter().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("*"), Some(n), Some(kw)) if kw.eq_ignore_ascii_case("EXISTS") => n.parse().ok(),
            _ => None,
        }
    })
}

/// Quote a string for an IMAP command (RFC 3501 quoted string).
fn imap_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Fetch the newest INBOX message as raw bytes (blocking, run in spawn_blocking).
///
/// Uses `BODY.PEEK[]` so the message's flags are left alone. The session is
/// logged out whatever the outcome.
fn fetch_latest_imap(config: &EmailConfig) -> Result<Option<Vec<u8>>, ImapError> {
    let mut session = ImapSession::connect(config)?;
    let result = fetch_latest_in_session(&mut session, config);
    let _ = session.command("LOGOUT");
    result
}

fn fetch_latest_in_session(
    session: &mut ImapSession,
    config: &EmailConfig,
) -> Result<Option<Vec<u8>>, ImapError> {
    let login = session.command(&format!(
        "LOGIN {} {}",
        imap_quote(&config.username),
        imap_quote(config.password.expose_secret())
    ))?;
    if !login.is_ok() {
        return Err("IMAP login failed".into());
    }

    let select = session.command("SELECT \"INBOX\"")?;
    if !select.is_ok() {
        return Err(format!("IMAP SELECT failed: {}", select.status.trim()).into());
    }

    let latest = match exists_count(&select.lines) {
        Some(n) if n > 0 => n,
        _ => return Ok(None),
    };

    let fetch = session.command(&format!("FETCH {latest} BODY.PEEK[]"))?;
    if !fetch.is_ok() {
        return Err(format!("IMAP FETCH failed: {}", fetch.status.trim()).into());
    }
    Ok(fetch.literals.into_iter().next())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            imap_host: "imap.test.com".into(),
            imap_port: 993,
            smtp_host: "smtp.test.com".into(),
            smtp_port: 587,
            username: "user".into(),
            password: SecretString::from("pass".to_string()),
            from_address: "sales@ourorg.com".into(),
        }
    }

    const RAW: &str = "From: Jane Doe <jane@acme.com>\r\n\
        To: sales@ourorg.com\r\n\
        Subject: Brochure request\r\n\
        Message-ID: <abc123@mail.acme.com>\r\n\
        References: <root1@mail.acme.com>\r\n \
        <mid2@mail.acme.com>\r\n\
        Date: Tue, 1 Oct 2024 10:00:00 +0000\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Please send your catalogue, see www.widgets.com\r\n";

    #[test]
    fn parse_inbound_extracts_fields() {
        let msg = parse_inbound(RAW.as_bytes()).unwrap();
        assert_eq!(msg.id, "abc123@mail.acme.com");
        assert_eq!(msg.sender, "Jane Doe <jane@acme.com>");
        assert_eq!(msg.subject, "Brochure request");
        assert_eq!(msg.body, "Please send your catalogue, see www.widgets.com");
        assert_eq!(msg.thread_id.as_deref(), Some("root1@mail.acme.com"));
    }

    #[test]
    fn header_value_unfolds_continuations() {
        let refs = header_value(RAW.as_bytes(), "references").unwrap();
        assert_eq!(
            message_ids(&refs),
            vec!["root1@mail.acme.com", "mid2@mail.acme.com"]
        );
        assert!(header_value(RAW.as_bytes(), "In-Reply-To").is_none());
    }

    #[test]
    fn thread_defaults_to_own_id() {
        let raw = "From: bob@beta.io\r\nMessage-ID: <solo@beta.io>\r\nSubject: Hi\r\n\r\nHello\r\n";
        let msg = parse_inbound(raw.as_bytes()).unwrap();
        assert_eq!(msg.sender, "bob@beta.io");
        assert_eq!(msg.thread_id.as_deref(), Some("solo@beta.io"));
    }

    #[test]
    fn imap_quote_escapes_quotes_and_backslashes() {
        assert_eq!(imap_quote("user@ourorg.com"), "\"user@ourorg.com\"");
        assert_eq!(imap_quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
        assert_eq!(imap_quote(""), "\"\"");
    }

    #[test]
    fn literal_size_parsing() {
        assert_eq!(literal_size("* 3 FETCH (BODY[] {1234}\r\n"), Some(1234));
        assert_eq!(literal_size("* 3 FETCH (FLAGS (\\Seen))\r\n"), None);
    }

    #[test]
    fn exists_count_parsing() {
        let lines = vec![
            "* FLAGS (\\Seen)\r\n".to_string(),
            "* 42 EXISTS\r\n".to_string(),
            "* 0 RECENT\r\n".to_string(),
        ];
        assert_eq!(exists_count(&lines), Some(42));
        assert_eq!(exists_count(&[]), None);
    }

    #[test]
    fn tagged_status_ok() {
        let resp = ImapResponse {
            status: "A2 OK [READ-WRITE] SELECT completed\r\n".into(),
            ..Default::default()
        };
        assert!(resp.is_ok());
        let resp = ImapResponse {
            status: "A1 NO LOGIN failed\r\n".into(),
            ..Default::default()
        };
        assert!(!resp.is_ok());
    }

    #[test]
    fn reply_message_threads_and_attaches() {
        let tmp = tempfile::tempdir().unwrap();
        let attachment = tmp.path().join("Acme_abc123ma.pdf");
        std::fs::write(&attachment, b"%PDF-1.4 test").unwrap();

        let reply = ReplyRequest {
            to: "jane@acme.com".into(),
            subject: "Re: Brochure request".into(),
            body: "Hello Jane".into(),
            attachment,
            in_reply_to: "abc123@mail.acme.com".into(),
            thread_id: Some("root1@mail.acme.com".into()),
        };
        let message = build_reply_message(&config(), &reply).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("In-Reply-To: <abc123@mail.acme.com>"));
        assert!(formatted.contains("References: <root1@mail.acme.com> <abc123@mail.acme.com>"));
        assert!(formatted.contains("Acme_abc123ma.pdf"));
        assert!(formatted.contains("application/pdf"));
    }

    #[test]
    fn reply_without_attachment_file_fails() {
        let reply = ReplyRequest {
            to: "jane@acme.com".into(),
            subject: "Re: Hi".into(),
            body: "Hello".into(),
            attachment: "/no/such/file.pdf".into(),
            in_reply_to: "abc".into(),
            thread_id: None,
        };
        assert!(matches!(
            build_reply_message(&config(), &reply),
            Err(ChannelError::SendFailed { .. })
        ));
    }

    #[test]
    fn config_from_env_returns_none_when_no_host() {
        // SAFETY: no other test reads EMAIL_IMAP_HOST.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(EmailConfig::from_env().is_none());
    }
}
