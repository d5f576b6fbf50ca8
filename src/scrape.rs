//! Website fetch: download a lead's site and reduce it to plain text.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::ChannelError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Wrap width handed to html2text.
const TEXT_WIDTH: usize = 120;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid regex"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid regex"));

/// Website fetch collaborator.
#[async_trait]
pub trait WebsiteFetcher: Send + Sync {
    /// Plain text of the page at `url`, or `None` when nothing usable came back.
    async fn fetch_text(&self, url: &str) -> Result<Option<String>, ChannelError>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebsiteFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<Option<String>, ChannelError> {
        let url = normalize_url(url);
        tracing::debug!(url = %url, "Fetching website");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{url}: {e}")))?;

        if resp.status() != reqwest::StatusCode::OK {
            tracing::warn!(url = %url, status = %resp.status(), "Website returned non-200");
            return Ok(None);
        }

        let html = resp
            .text()
            .await
            .map_err(|e| ChannelError::Http(format!("{url}: {e}")))?;

        let text = html_to_text(&html);
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }
}

/// Prefix `https://` when the input carries no scheme.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Render HTML as plain text with script/style content removed and blank
/// lines collapsed.
pub fn html_to_text(html: &str) -> String {
    let html = SCRIPT_RE.replace_all(html, "");
    let html = STYLE_RE.replace_all(&html, "");

    let rendered = match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "html2text failed, keeping raw markup");
            html.into_owned()
        }
    };

    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
