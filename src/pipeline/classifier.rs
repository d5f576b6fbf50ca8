//! Inbound message classifier.
//!
//! Decides whether the newest inbox message is a genuine brochure inquiry:
//! - automated senders and transactional phrases → rejected outright
//! - "Name <address>" sender → contact extraction
//! - document-request keyword in subject or body
//! - at least one candidate website (body URLs, bare domains, then the
//!   sender's own domain unless it is a free-mail provider)
//!
//! Pure and deterministic apart from advisory `debug!` logging.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{Classification, InboundMessage};

static SENDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*"?([^"<]*?)"?\s*<([^>]+)>"#).expect("sender regex is valid")
});

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://[^\s]+").expect("url regex is valid"));

static BARE_DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[a-zA-Z0-9-]+\.)+[a-zA-Z]{2,}\b").expect("domain regex is valid")
});

/// Deny-lists and keyword lists driving classification.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Substrings of the sender that mark it as automated.
    pub system_sender_patterns: Vec<String>,
    /// Phrases in subject+body typical of transactional mail.
    pub system_phrases: Vec<String>,
    /// Terms that signal a document request.
    pub request_keywords: Vec<String>,
    /// Consumer mail providers whose domain is never a company website.
    pub free_mail_providers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            system_sender_patterns: to_strings(&[
                "google.com",
                "microsoft.com",
                "outlook.com",
                "apple.com",
                "noreply@",
                "no-reply@",
                "donotreply@",
                "do-not-reply@",
                "notification@",
                "notifications@",
                "alert@",
                "alerts@",
                "support@",
                "help@",
                "info@",
                "contact@",
                "github.com",
                "gitlab.com",
                "bitbucket.com",
                "linkedin.com",
                "facebook.com",
                "twitter.com",
                "instagram.com",
                "amazon.com",
                "aws.amazon.com",
                "mail.google.com",
                "mail.office.com",
            ]),
            system_phrases: to_strings(&[
                "do not reply",
                "don't reply",
                "donotreply",
                "no-reply",
                "account activation",
                "verify your account",
                "confirm your email",
                "reset your password",
                "password reset",
                "change password",
                "confirm your identity",
                "two-factor authentication",
                "2fa",
                "welcome to",
                "welcome aboard",
                "get started",
                "verify your phone",
                "confirm your number",
                "suspicious activity",
                "unusual activity",
                "subscription confirmation",
                "booking confirmation",
                "order confirmation",
                "purchase confirmation",
                "payment received",
                "payment confirmation",
                "login attempt",
                "new login",
                "login from",
                "unsubscribe",
                "manage subscriptions",
                "manage preferences",
            ]),
            request_keywords: to_strings(&[
                "brochure",
                "catalogue",
                "catalog",
                "leaflet",
                "pamphlet",
                "prospectus",
                "flyer",
                "portfolio",
                "booklet",
                "information pack",
                "document",
                "presentation",
            ]),
            free_mail_providers: to_strings(&["gmail", "yahoo", "outlook", "hotmail"]),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

/// Lead classifier over a [`ClassifierConfig`].
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a message in a single pass.
    pub fn classify(&self, message: &InboundMessage) -> Classification {
        if self.is_system_message(&message.sender, &message.subject, &message.body) {
            return Classification::system();
        }

        let (contact_name, contact_email) = parse_sender(&message.sender).unwrap_or_default();

        let full_text = format!("{} {}", message.subject, message.body);
        let has_keyword = self.contains_request_keyword(&full_text);

        let mut websites = extract_websites(&message.body);
        if websites.is_empty()
            && let Some(domain) = self.fallback_domain(&contact_email)
        {
            websites.push(domain);
        }

        let has_body = !message.body.trim().is_empty();
        let qualifies = has_body
            && !contact_email.is_empty()
            && !contact_name.is_empty()
            && has_keyword
            && !websites.is_empty();

        debug!(
            id = %message.id,
            qualifies,
            has_keyword,
            websites = websites.len(),
            "Classified message"
        );

        Classification {
            is_system_message: false,
            qualifies,
            contact_name,
            contact_email,
            candidate_website: websites.into_iter().next().unwrap_or_default(),
        }
    }

    /// Deny-list check. A missing sender is itself disqualifying.
    pub fn is_system_message(&self, sender: &str, subject: &str, body: &str) -> bool {
        if sender.trim().is_empty() {
            debug!("Message has no sender, treating as automated");
            return true;
        }

        let sender = sender.to_lowercase();
        if let Some(pattern) = self
            .config
            .system_sender_patterns
            .iter()
            .find(|p| sender.contains(p.as_str()))
        {
            debug!(pattern = %pattern, "Sender matched automated-sender pattern");
            return true;
        }

        let content = format!("{} {}", subject, body).to_lowercase();
        if let Some(phrase) = self
            .config
            .system_phrases
            .iter()
            .find(|p| content.contains(p.as_str()))
        {
            debug!(phrase = %phrase, "Content matched automated-mail phrase");
            return true;
        }

        false
    }

    /// Whether `text` mentions any document-request keyword.
    pub fn contains_request_keyword(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.config
            .request_keywords
            .iter()
            .any(|k| lower.contains(k.as_str()))
    }

    /// Sender's domain, unless it belongs to a consumer mail provider.
    fn fallback_domain(&self, email: &str) -> Option<String> {
        let (_, domain) = email.rsplit_once('@')?;
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() {
            return None;
        }
        if self
            .config
            .free_mail_providers
            .iter()
            .any(|p| domain.contains(p.as_str()))
        {
            debug!(domain = %domain, "Free-mail domain is not a company website");
            return None;
        }
        Some(domain)
    }
}

/// Split `"Display Name <address>"` into `(name, address)`.
///
/// Returns `None` for bare addresses: without a display name the sender cannot qualify.
pub fn parse_sender(sender: &str) -> Option<(String, String)> {
    let caps = SENDER_RE.captures(sender)?;
    let name = caps.get(1)?.as_str().trim().to_string();
    let email = caps.get(2)?.as_str().trim().to_string();
    Some((name, email))
}

/// Collect candidate hostnames from `text`.
///
/// Absolute URLs come first, then bare `label.tld` tokens, each lowercased and
/// deduplicated in first-seen order.
pub fn extract_websites(text: &str) -> Vec<String> {
    let mut sites: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !candidate.is_empty() && !sites.contains(&candidate) {
            sites.push(candidate);
        }
    };

    for m in URL_RE.find_iter(text) {
        if let Some(host) = url_host(m.as_str()) {
            push(host);
        }
    }

    for m in BARE_DOMAIN_RE.find_iter(text) {
        let domain = m.as_str();
        if domain.contains('.') {
            push(domain.to_lowercase());
        }
    }

    sites
}

/// Host part of an absolute URL, lowercased.
fn url_host(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(sender: &str, subject: &str, body: &str) -> InboundMessage {
        InboundMessage::new("test-1", sender, subject, body)
    }

    #[test]
    fn qualifies_brochure_request_with_website() {
        let classifier = Classifier::default();
        let msg = make_message(
            "Jane Doe <jane@acme.com>",
            "Brochure request",
            "Please send your catalogue, see www.widgets.com",
        );
        let c = classifier.classify(&msg);
        assert!(c.qualifies);
        assert!(!c.is_system_message);
        assert_eq!(c.contact_name, "Jane Doe");
        assert_eq!(c.contact_email, "jane@acme.com");
        assert_eq!(c.candidate_website, "www.widgets.com");
    }

    #[test]
    fn deny_listed_sender_rejected_despite_content() {
        let classifier = Classifier::default();
        let msg = make_message(
            "noreply@github.com",
            "Your brochure",
            "Here is the brochure for acme.com",
        );
        let c = classifier.classify(&msg);
        assert!(c.is_system_message);
        assert!(!c.qualifies);
    }

    #[test]
    fn transactional_phrase_rejected() {
        let classifier = Classifier::default();
        let msg = make_message(
            "Jane Doe <jane@acme.com>",
            "Password reset",
            "Click to reset your password. Also send the brochure for acme.com",
        );
        assert!(classifier.classify(&msg).is_system_message);
    }

    #[test]
    fn missing_sender_is_system() {
        let classifier = Classifier::default();
        assert!(classifier.is_system_message("", "brochure", "acme.com"));
    }

    #[test]
    fn free_mail_domain_not_used_as_website() {
        let classifier = Classifier::default();
        let msg = make_message(
            "Bob <bob@gmail.com>",
            "Hello",
            "Could you send me a brochure please?",
        );
        let c = classifier.classify(&msg);
        assert!(!c.qualifies);
        assert!(c.candidate_website.is_empty());
        assert_eq!(c.contact_name, "Bob");
    }

    #[test]
    fn company_email_domain_used_as_fallback() {
        let classifier = Classifier::default();
        let msg = make_message(
            "Bob Stone <bob@stone-works.co.uk>",
            "Catalogue",
            "Could you send me your catalogue?",
        );
        let c = classifier.classify(&msg);
        assert!(c.qualifies);
        assert_eq!(c.candidate_website, "stone-works.co.uk");
    }

    #[test]
    fn bare_address_cannot_qualify() {
        let classifier = Classifier::default();
        let msg = make_message(
            "jane@acme.com",
            "Brochure",
            "Please send the brochure, site: acme.com",
        );
        let c = classifier.classify(&msg);
        assert!(!c.qualifies);
        assert!(c.contact_name.is_empty());
    }

    #[test]
    fn no_keyword_does_not_qualify() {
        let classifier = Classifier::default();
        let msg = make_message("Jane Doe <jane@acme.com>", "Hi", "Visit acme.com sometime");
        assert!(!classifier.classify(&msg).qualifies);
    }

    #[test]
    fn empty_body_never_qualifies() {
        let classifier = Classifier::default();
        let msg = make_message("Jane Doe <jane@acme.com>", "Brochure please", "   ");
        let c = classifier.classify(&msg);
        assert!(!c.qualifies);
    }

    #[test]
    fn urls_come_before_bare_domains() {
        let sites = extract_websites("see beta.io and https://Alpha.com/about?x=1 too");
        assert_eq!(sites, vec!["alpha.com", "beta.io"]);
    }

    #[test]
    fn first_website_wins() {
        let classifier = Classifier::default();
        let msg = make_message(
            "Jane Doe <jane@acme.com>",
            "Portfolio",
            "Our sites are first-site.com and second-site.org",
        );
        assert_eq!(classifier.classify(&msg).candidate_website, "first-site.com");
    }

    #[test]
    fn websites_are_deduplicated_and_lowercased() {
        let sites = extract_websites("https://WWW.Acme.com and www.acme.com again");
        assert_eq!(sites, vec!["www.acme.com"]);
    }

    #[test]
    fn url_host_strips_port_and_userinfo() {
        assert_eq!(url_host("http://user@host.example.com:8080/x"), Some("host.example.com".into()));
        assert_eq!(url_host("https://acme.com)."), Some("acme.com".into()));
    }

    #[test]
    fn quoted_display_name_parsed() {
        assert_eq!(
            parse_sender("\"Jane Doe\" <jane@acme.com>"),
            Some(("Jane Doe".to_string(), "jane@acme.com".to_string()))
        );
        assert_eq!(parse_sender("jane@acme.com"), None);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = Classifier::default();
        let msg = make_message(
            "Jane Doe <jane@acme.com>",
            "Brochure request",
            "Please send your catalogue, see www.widgets.com and https://acme.com",
        );
        assert_eq!(classifier.classify(&msg), classifier.classify(&msg));
    }
}
