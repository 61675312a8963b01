//! URL research: fetch a page and turn it into an ingestible document.
//!
//! Extraction is deliberately shallow: `<title>`, the meta description, and
//! the visible text with scripts, styles, and markup removed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use brandkb_core::answer::Researcher;
use brandkb_core::models::DocumentInput;

use crate::config::ResearchConfig;

pub const EXTERNAL_URL_TYPE: &str = "external_url";

pub struct HttpResearcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpResearcher {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl Researcher for HttpResearcher {
    async fn fetch(&self, url: &str) -> Result<DocumentInput> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("only http and https URLs can be researched");
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {}", url, status);
        }
        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                bail!("{} is too large ({} bytes)", url, len);
            }
        }

        let body = read_capped(response, self.max_bytes)
            .await
            .with_context(|| format!("reading {} failed", url))?;
        let html = String::from_utf8_lossy(&body);
        let page = extract_page(&html);
        if page.text.is_empty() {
            bail!("no readable text at {}", url);
        }

        tracing::debug!(url, title = ?page.title, bytes = body.len(), "fetched research page");
        Ok(page.into_document(url))
    }
}

/// Read the body chunk by chunk, giving up once it passes `max_bytes`.
///
/// `Content-Length` is absent on chunked responses, so the cap has to hold
/// while streaming.
async fn read_capped(mut response: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            bail!("response exceeds {} bytes", max_bytes);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[derive(Debug, Default, PartialEq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub text: String,
}

impl ExtractedPage {
    pub fn into_document(self, url: &str) -> DocumentInput {
        let title = self.title.unwrap_or_else(|| url.to_string());
        let content = match &self.description {
            Some(desc) if !self.text.starts_with(desc.as_str()) => {
                format!("{}\n\n{}", desc, self.text)
            }
            _ => self.text,
        };
        DocumentInput::new(title, content)
            .with_content_type(EXTERNAL_URL_TYPE)
            .with_metadata(serde_json::json!({
                "url": url,
                "description": self.description,
                "fetched_at": chrono::Utc::now().to_rfc3339(),
            }))
    }
}

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

fn title_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    re(&CELL, r"(?is)<title[^>]*>(.*?)</title>")
}

fn meta_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    re(&CELL, r#"(?is)<meta\s[^>]*>"#)
}

fn attr_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    re(&CELL, r#"(?is)([a-z:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
}

fn hidden_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    re(
        &CELL,
        r"(?is)<title\b.*?</title>|<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<head\b.*?</head>|<!--.*?-->",
    )
}

fn tag_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    re(&CELL, r"(?s)<[^>]*>")
}

fn space_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    re(&CELL, r"\s+")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn clean(text: &str) -> String {
    space_re()
        .replace_all(&decode_entities(text), " ")
        .trim()
        .to_string()
}

fn meta_description(html: &str) -> Option<String> {
    for tag in meta_re().find_iter(html) {
        let mut name = None;
        let mut content = None;
        for cap in attr_re().captures_iter(tag.as_str()) {
            let key = cap[1].to_ascii_lowercase();
            let value = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str());
            match key.as_str() {
                "name" | "property" => name = value.map(str::to_ascii_lowercase),
                "content" => content = value,
                _ => {}
            }
        }
        if matches!(name.as_deref(), Some("description") | Some("og:description")) {
            if let Some(c) = content.map(clean).filter(|c| !c.is_empty()) {
                return Some(c);
            }
        }
    }
    None
}

pub fn extract_page(html: &str) -> ExtractedPage {
    let title = title_re()
        .captures(html)
        .map(|c| clean(&c[1]))
        .filter(|t| !t.is_empty());
    let description = meta_description(html);

    let visible = hidden_re().replace_all(html, " ");
    let text = clean(&tag_re().replace_all(&visible, " "));

    ExtractedPage {
        title,
        description,
        text,
    }
}
