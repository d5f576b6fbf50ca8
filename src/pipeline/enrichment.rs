//! Enrichment: website → summary → company name, description and blurbs.
//!
//! Only the fetch and the summary can fail the enrichment. The three
//! extraction calls after it degrade to deterministic fallbacks, since the
//! model is not trusted to answer in the requested shape.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{EnrichError, LlmError};
use crate::llm::{CompletionRequest, LlmProvider};
use crate::pipeline::types::{BLURB_COUNT, EnrichmentResult};
use crate::scrape::WebsiteFetcher;

/// Website text beyond this many characters is cut before summarizing.
pub const CONTENT_CHAR_LIMIT: usize = 4000;
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated for summarization...]";

const SUMMARY_MAX_TOKENS: u32 = 400;
const GENERATION_MAX_TOKENS: u32 = 600;
const TEMPERATURE: f32 = 0.3;

pub const DESCRIPTION_PREFIX: &str = "providing ";
pub const FALLBACK_DESCRIPTION: &str = "innovative solutions in the digital space.";
pub const FILLER_BLURB: &str = "Service offering tailored to your organization's needs.";

static NEWLINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n+").unwrap());
static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BLURB_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[1-5][.)]\s*(.+?)\s*$").unwrap());

// ── Prompts ─────────────────────────────────────────────────────────

pub fn summary_prompt(content: &str) -> String {
    format!(
        "Summarize the key information from this scraped webpage content in a single continuous \
         paragraph of exactly 5-6 sentences. Focus on:\n\n\
         - Company overview and services/products offered\n\
         - Contact details, location, and team (if available)\n\
         - Any relevant business focus or unique selling points\n\n\
         Keep it professional, concise, and factual. Do NOT use any markdown (like **bold**), \
         bullet points, line breaks, or formatting. Output everything as one unbroken paragraph \
         with only spaces between sentences.\n\n\
         Content: {content}\n"
    )
}

pub fn company_name_prompt(summary: &str) -> String {
    format!(
        "Extract the exact company name from this webpage summary. Respond with ONLY the company \
         name (e.g., 'Acme Corporation'), nothing else.\n\n\
         Summary: {summary}\n"
    )
}

pub fn description_prompt(summary: &str) -> String {
    format!(
        "From this webpage summary, create a concise one-sentence description of what the company \
         does or deals with, phrased as 'providing [services] to [industries/clients]'. Respond \
         with ONLY that sentence, nothing else.\n\n\
         Summary: {summary}\n"
    )
}

pub fn blurbs_prompt(our_company: &str, company_name: &str, summary: &str) -> String {
    format!(
        "Generate 5 short, personalized blurbs (1-2 sentences each) for {our_company}'s services. \
         Explain how EACH of our services can specifically benefit {company_name} based on their \
         focus in this summary: {summary}.\n\n\
         Use the perspective of {our_company} offering help TO {company_name} (e.g., 'We can \
         optimize your workflows to enhance your digital efficiency').\n\n\
         Keep each professional, concise, and starting with 'We can' or similar. Number them \
         exactly 1-5, one per line, no extras or markdown:\n\n\
         1. Process Optimization & Workflow Analysis\n\
         2. Strategic Consulting & Planning\n\
         3. Custom Solution Development\n\
         4. Training & Knowledge Transfer\n\
         5. Quality Assurance & Performance Monitoring\n"
    )
}

// ── Normalization ───────────────────────────────────────────────────

/// Cut `content` to [`CONTENT_CHAR_LIMIT`] characters, appending the marker.
pub fn truncate_content(content: &str) -> String {
    match content.char_indices().nth(CONTENT_CHAR_LIMIT) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &content[..byte_idx]),
        None => content.to_string(),
    }
}

/// One paragraph: no newlines, no `**bold**`, single spaces.
pub fn normalize_summary(raw: &str) -> String {
    let text = NEWLINES_RE.replace_all(raw.trim(), " ");
    let text = BOLD_RE.replace_all(&text, "$1");
    SPACES_RE.replace_all(&text, " ").trim().to_string()
}

fn is_placeholder(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "" | "unknown" | "n/a")
}

/// Company name derived from the website's hostname: `www.blue-sky.io` → `Blue Sky`.
pub fn fallback_company_name(website: &str) -> String {
    let lower = website.trim().to_ascii_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = without_scheme
        .split(['/', '?', '#', ':'])
        .next()
        .unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    let label = host.split('.').next().unwrap_or_default();

    label
        .replace('-', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ensure exactly one leading `providing `, with the rest starting lowercase.
pub fn normalize_description(raw: &str) -> String {
    let mut text = raw.trim().trim_matches(['"', '\'']).trim();
    if is_placeholder(text) {
        text = FALLBACK_DESCRIPTION;
    }

    let rest = match text.get(..DESCRIPTION_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(DESCRIPTION_PREFIX) => {
            text[DESCRIPTION_PREFIX.len()..].trim_start()
        }
        _ => text,
    };

    let mut chars = rest.chars();
    let rest = match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect::<String>(),
        None => FALLBACK_DESCRIPTION.to_string(),
    };
    format!("{DESCRIPTION_PREFIX}{rest}")
}

/// Numbered lines `1.`–`5.` (or `1)`) in order of appearance, padded or
/// truncated to [`BLURB_COUNT`].
pub fn parse_blurbs(text: &str) -> Vec<String> {
    let mut blurbs: Vec<String> = BLURB_LINE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| SPACES_RE.replace_all(m.as_str(), " ").to_string())
        .filter(|b| !b.is_empty())
        .collect();

    blurbs.truncate(BLURB_COUNT);
    while blurbs.len() < BLURB_COUNT {
        blurbs.push(FILLER_BLURB.to_string());
    }
    blurbs
}

// ── Enricher ────────────────────────────────────────────────────────

/// Runs the enrichment stages for one website.
pub struct Enricher {
    llm: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn WebsiteFetcher>,
    /// Our organization, named in the blurbs prompt.
    our_company: String,
}

impl Enricher {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        fetcher: Arc<dyn WebsiteFetcher>,
        our_company: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            fetcher,
            our_company: our_company.into(),
        }
    }

    pub async fn enrich(&self, website: &str) -> Result<EnrichmentResult, EnrichError> {
        let content = self
            .fetcher
            .fetch_text(website)
            .await
            .map_err(|e| EnrichError::Fetch {
                website: website.to_string(),
                reason: e.to_string(),
            })?
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EnrichError::EmptyWebsite {
                website: website.to_string(),
            })?;
        info!(website, chars = content.chars().count(), "Website content fetched");

        let summary = self.summarize(&content).await?;
        let company_name = self.company_name(&summary, website).await;
        let company_description = self.description(&summary).await;
        let service_blurbs = self.blurbs(&company_name, &summary).await;

        Ok(EnrichmentResult {
            summary,
            company_name,
            company_description,
            service_blurbs,
        })
    }

    async fn ask(&self, prompt: String, max_tokens: u32) -> Result<String, LlmError> {
        let request = CompletionRequest::prompt(prompt)
            .with_max_tokens(max_tokens)
            .with_temperature(TEMPERATURE);
        let response = self.llm.complete(request).await?;
        Ok(response.content.trim().to_string())
    }

    async fn summarize(&self, content: &str) -> Result<String, EnrichError> {
        let original_len = content.chars().count();
        let content = truncate_content(content);
        if original_len > CONTENT_CHAR_LIMIT {
            info!(original_len, "Content truncated to {CONTENT_CHAR_LIMIT} chars");
        }

        let raw = self.ask(summary_prompt(&content), SUMMARY_MAX_TOKENS).await?;
        let summary = normalize_summary(&raw);
        if summary.is_empty() {
            return Err(EnrichError::EmptySummary);
        }
        info!(chars = summary.len(), "Generated summary");
        Ok(summary)
    }

    async fn company_name(&self, summary: &str, website: &str) -> String {
        let answer = match self
            .ask(company_name_prompt(summary), GENERATION_MAX_TOKENS)
            .await
        {
            Ok(answer) => answer.trim_matches(['"', '\'', '.']).trim().to_string(),
            Err(e) => {
                warn!(error = %e, "Company name extraction failed");
                String::new()
            }
        };

        if is_placeholder(&answer) {
            let fallback = fallback_company_name(website);
            debug!(website, fallback = %fallback, "Using hostname as company name");
            fallback
        } else {
            answer
        }
    }

    async fn description(&self, summary: &str) -> String {
        let answer = self
            .ask(description_prompt(summary), GENERATION_MAX_TOKENS)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Description extraction failed");
                String::new()
            });
        normalize_description(&answer)
    }

    async fn blurbs(&self, company_name: &str, summary: &str) -> Vec<String> {
        let answer = self
            .ask(
                blurbs_prompt(&self.our_company, company_name, summary),
                GENERATION_MAX_TOKENS,
            )
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Blurb generation failed");
                String::new()
            });
        parse_blurbs(&answer)
    }
}
