//! Engine configuration with builder-style setters and environment
//! resolution.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::types::KbError;

/// Everything a [`crate::engine::KnowledgeEngine`] needs to crawl, build,
/// and answer for one site.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Seed URL; the crawl never leaves this URL's host.
    pub base_url: Url,
    /// SQLite database file for session persistence.
    pub db_path: PathBuf,
    /// Directory downloaded PDFs are written into.
    pub pdf_dir: PathBuf,
    /// Hard page cap per crawl.
    pub max_pages: usize,
    /// Word budget per chunk.
    pub max_tokens: usize,
    /// Passages retrieved per query.
    pub top_k: usize,
    /// Chat exchanges folded into the answer prompt.
    pub history_window: usize,
    /// Characters of each prior answer kept in the prompt.
    pub history_answer_chars: usize,
    /// Pause between crawl requests.
    pub request_delay: Duration,
    pub page_timeout: Duration,
    pub pdf_timeout: Duration,
    pub sitemap_timeout: Duration,
    pub user_agent: String,
}

impl EngineConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            db_path: PathBuf::from("knowledge_base.db"),
            pdf_dir: PathBuf::from("pdfs"),
            max_pages: 1000,
            max_tokens: 600,
            top_k: 3,
            history_window: 5,
            history_answer_chars: 100,
            request_delay: Duration::from_millis(500),
            page_timeout: Duration::from_secs(20),
            pdf_timeout: Duration::from_secs(30),
            sitemap_timeout: Duration::from_secs(10),
            user_agent: concat!("sitesmith/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Builds a config from the environment, loading `.env` first if one
    /// is present. `SITESMITH_BASE_URL` is required; everything else
    /// falls back to defaults.
    pub fn from_env() -> Result<Self, KbError> {
        dotenvy::dotenv().ok();
        let base_url = std::env::var("SITESMITH_BASE_URL")
            .map_err(|_| KbError::InvalidDocument("SITESMITH_BASE_URL is not set".to_string()))?;
        let mut config = Self::new(Url::parse(&base_url)?);
        if let Ok(path) = std::env::var("SITESMITH_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("SITESMITH_PDF_DIR") {
            config.pdf_dir = PathBuf::from(dir);
        }
        if let Ok(pages) = std::env::var("SITESMITH_MAX_PAGES") {
            if let Ok(pages) = pages.parse() {
                config.max_pages = pages;
            }
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    #[must_use]
    pub fn with_pdf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pdf_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    #[must_use]
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
