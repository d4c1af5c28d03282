//! Outbound link and PDF discovery, plus best-effort sitemap seeding.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

/// Link targets that are never worth fetching as pages.
const EXCLUDED_EXTENSIONS: [&str; 7] =
    [".jpg", ".jpeg", ".png", ".gif", ".zip", ".doc", ".docx"];

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static SCRIPTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("static selector"));
static SITEMAP_LOCS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("loc").expect("static selector"));
static SCRIPT_PDF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']*\.pdf)["']"#).expect("static regex"));

/// Links found on one page, already canonicalized.
#[derive(Debug, Default)]
pub struct DiscoveredLinks {
    pub pages: Vec<Url>,
    pub pdfs: Vec<Url>,
}

/// Drops the fragment and keeps scheme/host/path/query.
pub fn canonicalize(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical
}

/// Whether a URL lives on the crawl's origin host.
pub fn same_host(url: &Url, base_host: &str) -> bool {
    url.host_str() == Some(base_host)
}

/// Finds outbound page links and PDF links in a fetched page.
///
/// Anchor `.pdf` targets are captured wherever they point; `.pdf` paths
/// matched inside inline script text are captured only when they resolve
/// to the origin host. Page links are kept only when same-host and not a
/// known non-document extension.
pub fn discover_links(html: &str, page_url: &Url, base_host: &str) -> DiscoveredLinks {
    let document = Html::parse_document(html);
    let mut links = DiscoveredLinks::default();
    let mut seen_pages: HashSet<String> = HashSet::new();
    let mut seen_pdfs: HashSet<String> = HashSet::new();

    for anchor in document.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(absolute) = page_url.join(href) else {
            continue;
        };
        let absolute = canonicalize(&absolute);

        if absolute.path().to_ascii_lowercase().ends_with(".pdf") {
            if seen_pdfs.insert(absolute.as_str().to_string()) {
                links.pdfs.push(absolute);
            }
            continue;
        }

        if !same_host(&absolute, base_host) {
            continue;
        }
        let lower = absolute.as_str().to_ascii_lowercase();
        if EXCLUDED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            continue;
        }
        if seen_pages.insert(absolute.as_str().to_string()) {
            links.pages.push(absolute);
        }
    }

    for script in document.select(&SCRIPTS) {
        let body: String = script.text().collect();
        for capture in SCRIPT_PDF.captures_iter(&body) {
            let Ok(absolute) = page_url.join(&capture[1]) else {
                continue;
            };
            let absolute = canonicalize(&absolute);
            if !same_host(&absolute, base_host) {
                continue;
            }
            if seen_pdfs.insert(absolute.as_str().to_string()) {
                links.pdfs.push(absolute);
            }
        }
    }

    links
}

/// Collects URLs advertised by the site's sitemaps and `robots.txt`.
///
/// Entirely best-effort: any fetch or parse failure is swallowed and the
/// crawl proceeds from the seed URL alone.
pub async fn discover_from_sitemaps(client: &Client, base_url: &Url, timeout: Duration) -> Vec<Url> {
    let mut candidates: Vec<Url> = Vec::new();
    for path in ["/sitemap.xml", "/sitemap_index.xml", "/robots.txt"] {
        if let Ok(url) = base_url.join(path) {
            candidates.push(url);
        }
    }

    let mut fetched: HashSet<String> = HashSet::new();
    let mut found: Vec<Url> = Vec::new();
    let mut found_seen: HashSet<String> = HashSet::new();

    while let Some(candidate) = candidates.pop() {
        if !fetched.insert(candidate.as_str().to_string()) {
            continue;
        }
        // Bounded: nested sitemap indexes can chain, but never far.
        if fetched.len() > 32 {
            break;
        }
        let body = match client.get(candidate.clone()).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    debug!(url = %candidate, %err, "sitemap body unreadable");
                    continue;
                }
            },
            Ok(response) => {
                debug!(url = %candidate, status = %response.status(), "sitemap not available");
                continue;
            }
            Err(err) => {
                debug!(url = %candidate, %err, "sitemap fetch failed");
                continue;
            }
        };

        if candidate.path().ends_with("robots.txt") {
            for line in body.lines() {
                if let Some(rest) = line.strip_prefix("Sitemap:") {
                    if let Ok(url) = Url::parse(rest.trim()) {
                        candidates.push(url);
                    }
                }
            }
            continue;
        }

        let document = Html::parse_document(&body);
        for loc in document.select(&SITEMAP_LOCS) {
            let text: String = loc.text().collect();
            let Ok(url) = Url::parse(text.trim()) else {
                continue;
            };
            // A <loc> may itself point at a nested sitemap.
            if url.path().to_ascii_lowercase().ends_with(".xml") {
                candidates.push(url);
            } else if found_seen.insert(url.as_str().to_string()) {
                found.push(canonicalize(&url));
            }
        }
    }

    found
}
