//! HTML page extraction built on `scraper`.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::normalize::normalize;

use super::{Source, SourceKind};

/// Pages whose normalized text is shorter than this are treated as empty.
pub const MIN_PAGE_CHARS: usize = 100;

/// Title used when a page has no `<title>` element.
pub const FALLBACK_TITLE: &str = "No Title";

/// Subtrees excluded from extraction entirely.
const EXCLUDED_CONTAINERS: [&str; 5] = ["script", "style", "nav", "footer", "header"];

static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static HEADINGS: LazyLock<Selector> = LazyLock::new(|| sel("title, h1, h2, h3, h4, h5, h6"));
static CONTENT: LazyLock<Selector> =
    LazyLock::new(|| sel("p, li, td, th, div, span, article, section"));
static META_DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| sel(r#"meta[name="description"]"#));
static IMAGES: LazyLock<Selector> = LazyLock::new(|| sel("img[alt]"));

fn sel(selectors: &str) -> Selector {
    Selector::parse(selectors).expect("static selector")
}

/// Extracts the meaningful text of a page as a [`Source`].
///
/// Script/style/nav/footer/header subtrees are ignored. Headings are
/// emitted as `HEADING:` lines, substantial text blocks verbatim, the
/// description meta tag as a `META:` line, and image alt text as `IMAGE:`
/// lines. Returns `None` when the normalized result is shorter than
/// [`MIN_PAGE_CHARS`] — a thin page is not an error, it is just skipped.
pub fn extract_page(html: &str, url: &Url) -> Option<Source> {
    let document = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    for element in document.select(&HEADINGS) {
        if in_excluded_subtree(&element) {
            continue;
        }
        let text = element_text(&element);
        if text.len() > 3 {
            lines.push(format!("HEADING: {text}"));
        }
    }

    for element in document.select(&CONTENT) {
        if in_excluded_subtree(&element) {
            continue;
        }
        let text = element_text(&element);
        if text.len() > 20 {
            lines.push(text);
        }
    }

    if let Some(meta) = document.select(&META_DESCRIPTION).next() {
        if let Some(content) = meta.value().attr("content") {
            lines.push(format!("META: {content}"));
        }
    }

    for image in document.select(&IMAGES) {
        let alt = image.value().attr("alt").unwrap_or_default().trim();
        if alt.len() > 5 {
            lines.push(format!("IMAGE: {alt}"));
        }
    }

    let text = normalize(&lines.join("\n"));
    if text.len() < MIN_PAGE_CHARS {
        return None;
    }

    Some(Source {
        uri: url.as_str().to_string(),
        kind: SourceKind::Web,
        title: page_title(&document),
        text,
    })
}

/// Title of the page, falling back to [`FALLBACK_TITLE`].
pub fn page_title(document: &Html) -> String {
    document
        .select(&TITLE)
        .next()
        .map(|el| element_text(&el))
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

fn element_text(element: &ElementRef) -> String {
    let raw: String = element.text().collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn in_excluded_subtree(element: &ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| EXCLUDED_CONTAINERS.contains(&ancestor.value().name()))
}
