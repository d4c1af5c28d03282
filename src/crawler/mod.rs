//! Breadth-first same-origin crawler producing extraction [`Source`]s.

pub mod discovery;
pub mod frontier;

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::extract::{self, Source, SourceKind};
use crate::stores::PdfRecord;
use crate::types::KbError;

use discovery::{canonicalize, discover_from_sitemaps, discover_links, same_host};
use frontier::Frontier;

/// Everything one crawl run produced: extracted sources (web pages first,
/// then PDFs in discovery order) plus the downloaded-PDF records for the
/// session store.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub sources: Vec<Source>,
    pub pdf_records: Vec<PdfRecord>,
    pub pages_crawled: usize,
    pub pdfs_processed: usize,
}

/// Polite single-site crawler.
///
/// Traverses breadth-first from the seed URL (plus any sitemap-advertised
/// URLs), never leaves the seed's host for pages, sleeps between requests,
/// and stops after `max_pages` fetches whether or not they yielded
/// content. PDF links collected along the way are downloaded afterwards in
/// a separate pass.
pub struct Crawler {
    client: Client,
    base_url: Url,
    base_host: String,
    max_pages: usize,
    page_timeout: Duration,
    pdf_timeout: Duration,
    sitemap_timeout: Duration,
    request_delay: Duration,
    pdf_dir: PathBuf,
}

impl Crawler {
    pub fn new(config: &EngineConfig) -> Result<Self, KbError> {
        let base_host = config
            .base_url
            .host_str()
            .ok_or_else(|| KbError::InvalidDocument("seed url has no host".to_string()))?
            .to_string();
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: canonicalize(&config.base_url),
            base_host,
            max_pages: config.max_pages,
            page_timeout: config.page_timeout,
            pdf_timeout: config.pdf_timeout,
            sitemap_timeout: config.sitemap_timeout,
            request_delay: config.request_delay,
            pdf_dir: config.pdf_dir.clone(),
        })
    }

    /// Runs a full crawl: pages first, then the PDF pass.
    pub async fn crawl(&self) -> Result<CrawlOutcome, KbError> {
        let mut frontier = Frontier::new();
        frontier.enqueue(self.base_url.clone());

        for url in discover_from_sitemaps(&self.client, &self.base_url, self.sitemap_timeout).await
        {
            if same_host(&url, &self.base_host) {
                frontier.enqueue(url);
            }
        }
        info!(
            base = %self.base_url,
            seeded = frontier.pending(),
            "starting crawl"
        );

        let mut sources: Vec<Source> = Vec::new();
        let mut fetched = 0usize;
        while let Some(url) = frontier.pop() {
            // The ceiling bounds fetches, not extractions: thin and
            // erroring pages count too.
            if fetched >= self.max_pages {
                break;
            }
            if !frontier.mark_visited(&url) {
                continue;
            }
            fetched += 1;

            let html = match self.fetch_page(&url).await {
                Ok(Some(html)) => html,
                Ok(None) => continue,
                Err(err) => {
                    warn!(url = %url, %err, "page fetch failed");
                    continue;
                }
            };

            if let Some(source) = extract::html::extract_page(&html, &url) {
                debug!(url = %url, chars = source.text.len(), "page extracted");
                sources.push(source);
            }

            let links = discover_links(&html, &url, &self.base_host);
            for page in links.pages {
                frontier.enqueue(page);
            }
            for pdf in links.pdfs {
                frontier.add_pdf(pdf);
            }

            tokio::time::sleep(self.request_delay).await;
        }

        let pages_crawled = sources.len();
        let pdf_links = frontier.into_pdf_links();
        let (pdf_sources, pdf_records) = self.fetch_pdfs(&pdf_links).await?;
        let pdfs_processed = pdf_sources.len();
        sources.extend(pdf_sources);

        info!(pages_crawled, pdfs_processed, "crawl finished");
        Ok(CrawlOutcome {
            sources,
            pdf_records,
            pages_crawled,
            pdfs_processed,
        })
    }

    async fn fetch_page(&self, url: &Url) -> Result<Option<String>, KbError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.page_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "skipping page");
            return Ok(None);
        }
        Ok(Some(response.text().await?))
    }

    /// Downloads and extracts the collected PDF links. Each document fails
    /// independently: a bad download or unreadable file is logged and
    /// skipped, never fatal to the crawl.
    async fn fetch_pdfs(&self, links: &[Url]) -> Result<(Vec<Source>, Vec<PdfRecord>), KbError> {
        if links.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        fs::create_dir_all(&self.pdf_dir).await?;

        let mut sources = Vec::new();
        let mut records = Vec::new();
        for (position, url) in links.iter().enumerate() {
            let filename = pdf_filename(url, position);
            match self.fetch_one_pdf(url, &filename).await {
                Ok(Some((source, record))) => {
                    sources.push(source);
                    records.push(record);
                }
                Ok(None) => debug!(url = %url, "pdf had no extractable text"),
                Err(err) => warn!(url = %url, %err, "pdf processing failed"),
            }
            tokio::time::sleep(self.request_delay).await;
        }
        Ok((sources, records))
    }

    async fn fetch_one_pdf(
        &self,
        url: &Url,
        filename: &str,
    ) -> Result<Option<(Source, PdfRecord)>, KbError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.pdf_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "skipping pdf");
            return Ok(None);
        }
        let bytes = response.bytes().await?;

        let path = self.pdf_dir.join(filename);
        fs::write(&path, &bytes).await?;

        let Some(text) = extract::pdf::extract_text(&bytes)? else {
            return Ok(None);
        };
        let title = extract::pdf::title_from_filename(filename);
        let source = Source {
            uri: filename.to_string(),
            kind: SourceKind::Pdf,
            title: title.clone(),
            text,
        };
        let record = PdfRecord {
            url: url.as_str().to_string(),
            filename: filename.to_string(),
            path: path.to_string_lossy().into_owned(),
        };
        Ok(Some((source, record)))
    }
}

/// Local filename for a downloaded PDF: the URL path's last segment, or a
/// positional name when the path has none.
fn pdf_filename(url: &Url, position: usize) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("document_{position}.pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_from_url_path() {
        let url = Url::parse("https://site.test/files/fee_structure.pdf").unwrap();
        assert_eq!(pdf_filename(&url, 0), "fee_structure.pdf");
    }

    #[test]
    fn filename_fallback_when_path_is_bare() {
        let url = Url::parse("https://site.test/").unwrap();
        assert_eq!(pdf_filename(&url, 3), "document_3.pdf");
    }
}
