use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::LinksSection;

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?<text>[^\]]+)\]\((?<url>[^)]+)\)$").expect("valid regex"));

static HTML_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(?<title>.*?)</title>").expect("valid regex")
});

/// Seam between link resolution and the network, so the rendering logic can
/// be exercised without HTTP in tests.
pub trait TitleSource {
    /// Title of an HTML page, from its `<title>` element.
    fn page_title(&mut self, url: &str) -> Result<Option<String>>;
    /// Title of a forum topic, from the JSON document at `<url>.json`.
    fn topic_title(&mut self, url: &str) -> Result<Option<String>>;
}

pub struct HttpTitleSource {
    client: Client,
    user_agent: String,
}

impl HttpTitleSource {
    pub fn new(links: &LinksSection) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(links.timeout_ms()))
            .build()
            .context("failed to build link-enrichment HTTP client")?;
        Ok(Self {
            client,
            user_agent: links.user_agent(),
        })
    }

    fn get_text(&self, url: &str, accept: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.clone())
            .header("Accept", accept)
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} while fetching {}", status.as_u16(), url);
        }
        response.text().context("failed to read response body")
    }
}

impl TitleSource for HttpTitleSource {
    fn page_title(&mut self, url: &str) -> Result<Option<String>> {
        let body = self.get_text(url, "text/html, */*;q=0.1")?;
        Ok(extract_html_title(&body))
    }

    fn topic_title(&mut self, url: &str) -> Result<Option<String>> {
        let body = self.get_text(&format!("{url}.json"), "application/json")?;
        let payload: Value = serde_json::from_str(&body)
            .with_context(|| format!("failed to decode topic JSON from {url}"))?;
        Ok(payload
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(ToString::to_string))
    }
}

pub fn extract_html_title(body: &str) -> Option<String> {
    HTML_TITLE
        .captures(body)
        .map(|captures| collapse_whitespace(&captures["title"]))
        .filter(|title| !title.is_empty())
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves link specifiers to display titles with a process-lifetime
/// memoization cache. Failures are collected as log lines and the entry is
/// dropped from the rendered list; nothing is retried or propagated.
pub struct LinkResolver<S> {
    source: S,
    cache: HashMap<String, Option<String>>,
    failures: Vec<String>,
}

impl<S: TitleSource> LinkResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: HashMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Render a comma-separated list of link specifiers (`[text](url)` pairs
    /// or raw URLs) as an HTML list. Empty input renders nothing.
    pub fn render_links(&mut self, spec: &str) -> String {
        let mut items = Vec::new();
        for raw in spec.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            if let Some(captures) = MARKDOWN_LINK.captures(raw) {
                let url = captures["url"].trim().to_string();
                let text = collapse_whitespace(&captures["text"]);
                self.cache.entry(url.clone()).or_insert(Some(text.clone()));
                items.push((url, text));
                continue;
            }

            if let Some(title) = self.lookup(raw, FetchKind::Page) {
                items.push((raw.to_string(), title));
            }
        }
        render_list(&items)
    }

    /// Render a comma-separated list of numeric forum topic IDs, resolved
    /// against the given topic URL prefix.
    pub fn render_topics(&mut self, spec: &str, url_prefix: &str) -> String {
        let mut items = Vec::new();
        for raw in spec.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            if !raw.chars().all(|ch| ch.is_ascii_digit()) {
                self.failures
                    .push(format!("ignoring non-numeric topic ID: {raw}"));
                continue;
            }
            let url = format!("{url_prefix}{raw}");
            if let Some(title) = self.lookup(&url, FetchKind::Topic) {
                items.push((url, title));
            }
        }
        render_list(&items)
    }

    fn lookup(&mut self, url: &str, kind: FetchKind) -> Option<String> {
        if let Some(cached) = self.cache.get(url) {
            return cached.clone();
        }

        let fetched = match kind {
            FetchKind::Page => self.source.page_title(url),
            FetchKind::Topic => self.source.topic_title(url),
        };
        let resolved = match fetched {
            Ok(Some(title)) => Some(title),
            Ok(None) => {
                self.failures.push(format!("no title found for {url}"));
                None
            }
            Err(error) => {
                self.failures.push(format!("{url}: {error:#}"));
                None
            }
        };
        self.cache.insert(url.to_string(), resolved.clone());
        resolved
    }
}

#[derive(Clone, Copy)]
enum FetchKind {
    Page,
    Topic,
}

fn render_list(items: &[(String, String)]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut html = String::from("<ul class=\"relatedlinks\">");
    for (url, title) in items {
        html.push_str(&format!(
            "<li><a href=\"{url}\" target=\"_blank\" rel=\"noopener noreferrer\">{title}</a></li>"
        ));
    }
    html.push_str("</ul>");
    html
}
