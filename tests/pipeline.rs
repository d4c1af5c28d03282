//! End-to-end pipeline tests against a mocked website.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use url::Url;

use sitesmith::answer::{Answerer, DEFAULT_SUGGESTIONS};
use sitesmith::engine::DataSource;
use sitesmith::stores::SessionBackend;
use sitesmith::{
    BuildMode, Crawler, Embedder, EngineConfig, HashEmbedder, KbError, KnowledgeEngine,
    SqliteSessionStore,
};

/// Builds a minimal single-font PDF with one page per entry.
fn build_pdf(page_texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in page_texts {
        let mut operations = Vec::new();
        if !text.is_empty() {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]);
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content stream"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize pdf");
    bytes
}

struct StubAnswerer;

#[async_trait]
impl Answerer for StubAnswerer {
    async fn answer(&self, _question: &str, context: &[String]) -> Result<String, KbError> {
        Ok(format!("answered from {} passages", context.len()))
    }

    async fn suggest(&self, _question: &str, _answer: &str) -> Result<Vec<String>, KbError> {
        // Empty on purpose: the engine must fall back to defaults.
        Ok(Vec::new())
    }
}

/// Answerer that records the exact question text it is handed.
struct RecordingAnswerer {
    questions: Mutex<Vec<String>>,
}

impl RecordingAnswerer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            questions: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Answerer for RecordingAnswerer {
    async fn answer(&self, question: &str, _context: &[String]) -> Result<String, KbError> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok("recorded".to_string())
    }

    async fn suggest(&self, _question: &str, _answer: &str) -> Result<Vec<String>, KbError> {
        Ok(Vec::new())
    }
}

/// Embedder that works until `fail` is flipped, then errors on every call.
struct ToggleEmbedder {
    inner: HashEmbedder,
    fail: AtomicBool,
}

impl ToggleEmbedder {
    fn new(dimensions: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(dimensions),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Embedder for ToggleEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KbError::Embedding("backend down".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

const HOME_HTML: &str = r#"<html>
<head><title>Greenfield Academy</title></head>
<body>
  <h1>Welcome to Greenfield Academy</h1>
  <p>Greenfield Academy has offered a broad curriculum to students of all
     ages for more than one hundred years, with small classes and dedicated
     teachers across every department of the school.</p>
  <a href="/about">About us</a>
  <a href="/files/fee_structure.pdf">Fee structure</a>
</body></html>"#;

const ABOUT_HTML: &str = r#"<html>
<head><title>About Us</title></head>
<body>
  <h1>Our History</h1>
  <p>Founded in 1910, the academy grew from a single classroom into a campus
     serving over nine hundred students, and admissions open every January
     for the following school year.</p>
  <a href="/">Home</a>
</body></html>"#;

async fn mock_site(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200)
                .header("content-type", "text/html")
                .body(HOME_HTML);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/about");
            then.status(200)
                .header("content-type", "text/html")
                .body(ABOUT_HTML);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/files/fee_structure.pdf");
            then.status(200)
                .header("content-type", "application/pdf")
                .body(build_pdf(&[
                    "Annual tuition is 4200 for the junior school and 5600 for seniors.",
                ]));
        })
        .await;
}

fn test_config(server: &MockServer, pdf_dir: &std::path::Path) -> EngineConfig {
    let base = Url::parse(&server.base_url()).expect("mock server url");
    EngineConfig::new(base)
        .with_pdf_dir(pdf_dir)
        .with_request_delay(Duration::ZERO)
        .with_max_pages(10)
}

#[tokio::test]
async fn crawl_build_and_query() {
    let server = MockServer::start_async().await;
    mock_site(&server).await;
    let pdf_dir = tempfile::tempdir().expect("tempdir");

    let store = Arc::new(SqliteSessionStore::open_in_memory().await.unwrap());
    let engine = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        Arc::new(HashEmbedder::new(128)),
        store.clone(),
        Arc::new(StubAnswerer),
    );

    // Not ready before the first build.
    assert!(!engine.is_ready());
    assert!(matches!(
        engine.query("anything", &[]).await,
        Err(KbError::NotReady)
    ));

    engine.run_build_now(BuildMode::ForceRebuild).await.unwrap();

    let status = engine.status();
    assert!(status.ready);
    assert_eq!(status.pages_crawled, 2);
    assert_eq!(status.pdfs_processed, 1);
    assert!(status.chunk_count >= 3);
    assert_eq!(status.source, Some(DataSource::FreshCrawl));
    assert!(status.last_error.is_none());

    // Every chunk opens with a provenance header of the right shape.
    let hits = engine.search("admissions open every January", 10).await;
    assert!(!hits.is_empty());
    for chunk in &hits {
        assert!(chunk.text.starts_with("SOURCE: "));
    }
    assert!(
        hits.iter()
            .any(|chunk| chunk.text.contains("(PDF: fee_structure.pdf)")),
        "pdf chunk should carry its filename provenance"
    );
    assert!(
        hits.iter().any(|chunk| chunk.text.contains("(WEB: http")),
        "web chunks should carry their page url"
    );

    // The PDF was written to disk under its own filename.
    assert!(pdf_dir.path().join("fee_structure.pdf").exists());

    let response = engine
        .query("when do admissions open", &[])
        .await
        .unwrap();
    assert!(response.answer.contains("passages"));
    assert_eq!(response.suggestions.len(), DEFAULT_SUGGESTIONS.len());
    assert!(response.sources.len() <= 3);
    for source in &response.sources {
        assert!(source.starts_with("http"), "sources are web links only");
    }

    // The session landed in the store.
    let totals = store.stats().await.unwrap();
    assert_eq!(totals.sessions, 1);
    assert_eq!(totals.active_sessions, 1);
    assert_eq!(totals.pdf_documents, 1);
}

#[tokio::test]
async fn load_or_build_reuses_the_stored_session() {
    let server = MockServer::start_async().await;
    mock_site(&server).await;
    let pdf_dir = tempfile::tempdir().expect("tempdir");

    let store = Arc::new(SqliteSessionStore::open_in_memory().await.unwrap());
    let embedder = Arc::new(HashEmbedder::new(128));

    let first = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        embedder.clone(),
        store.clone(),
        Arc::new(StubAnswerer),
    );
    first.run_build_now(BuildMode::ForceRebuild).await.unwrap();
    let built_chunks = first.status().chunk_count;

    // A fresh engine over the same store comes up without crawling.
    let second = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        embedder,
        store.clone(),
        Arc::new(StubAnswerer),
    );
    second.run_build_now(BuildMode::LoadOrBuild).await.unwrap();

    let status = second.status();
    assert!(status.ready);
    assert_eq!(status.source, Some(DataSource::Store));
    assert_eq!(status.chunk_count, built_chunks);

    // Retrieval works identically on the restored snapshot.
    let hits = second.search("annual tuition for the junior school", 3).await;
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn history_informs_retrieval_and_second_build_supersedes() {
    let server = MockServer::start_async().await;
    mock_site(&server).await;
    let pdf_dir = tempfile::tempdir().expect("tempdir");

    let store = Arc::new(SqliteSessionStore::open_in_memory().await.unwrap());
    let engine = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        Arc::new(HashEmbedder::new(128)),
        store.clone(),
        Arc::new(StubAnswerer),
    );
    engine.run_build_now(BuildMode::ForceRebuild).await.unwrap();

    let history = vec![sitesmith::Exchange {
        question: "what is the annual tuition".to_string(),
        answer: "Annual tuition is 4200 for the junior school.".to_string(),
    }];
    let response = engine.query("and for seniors?", &history).await.unwrap();
    assert!(!response.answer.is_empty());

    // A forced rebuild writes a second session and deactivates the first.
    engine.run_build_now(BuildMode::ForceRebuild).await.unwrap();
    let totals = store.stats().await.unwrap();
    assert_eq!(totals.sessions, 2);
    assert_eq!(totals.active_sessions, 1);
}

#[tokio::test]
async fn page_ceiling_bounds_fetches_not_extractions() {
    let server = MockServer::start_async().await;
    // A chain of thin pages: each one is too short to extract but links to
    // the next, so only the fetch cap can stop the crawl.
    let mut mocks = Vec::new();
    for i in 0..6 {
        let body = format!(
            r#"<html><body><a href="/p{}">next</a></body></html>"#,
            i + 1
        );
        let mock = server
            .mock_async(move |when, then| {
                when.method(GET).path(format!("/p{i}"));
                then.status(200)
                    .header("content-type", "text/html")
                    .body(body);
            })
            .await;
        mocks.push(mock);
    }

    let base = Url::parse(&format!("{}/p0", server.base_url())).unwrap();
    let config = EngineConfig::new(base)
        .with_request_delay(Duration::ZERO)
        .with_max_pages(2);
    let outcome = Crawler::new(&config).unwrap().crawl().await.unwrap();

    // Nothing extractable, but budget was still spent on the fetches.
    assert_eq!(outcome.pages_crawled, 0);
    assert_eq!(mocks[0].hits_async().await, 1);
    assert_eq!(mocks[1].hits_async().await, 1);
    for mock in &mocks[2..] {
        assert_eq!(mock.hits_async().await, 0, "fetched past the page cap");
    }
}

#[tokio::test]
async fn query_degrades_to_no_context_when_retrieval_fails() {
    let server = MockServer::start_async().await;
    mock_site(&server).await;
    let pdf_dir = tempfile::tempdir().expect("tempdir");

    let embedder = ToggleEmbedder::new(128);
    let store = Arc::new(SqliteSessionStore::open_in_memory().await.unwrap());
    let engine = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        embedder.clone(),
        store,
        Arc::new(StubAnswerer),
    );
    engine.run_build_now(BuildMode::ForceRebuild).await.unwrap();

    embedder.fail.store(true, Ordering::SeqCst);
    let response = engine
        .query("when do admissions open", &[])
        .await
        .expect("retrieval failure must not fail the query");
    assert_eq!(response.answer, "answered from 0 passages");
    assert!(response.sources.is_empty());
    assert_eq!(response.suggestions.len(), DEFAULT_SUGGESTIONS.len());
}

#[tokio::test]
async fn answerer_receives_truncated_history() {
    let server = MockServer::start_async().await;
    mock_site(&server).await;
    let pdf_dir = tempfile::tempdir().expect("tempdir");

    let answerer = RecordingAnswerer::new();
    let store = Arc::new(SqliteSessionStore::open_in_memory().await.unwrap());
    let engine = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        Arc::new(HashEmbedder::new(128)),
        store,
        answerer.clone(),
    );
    engine.run_build_now(BuildMode::ForceRebuild).await.unwrap();

    let long_answer = "y".repeat(120);
    let history = vec![sitesmith::Exchange {
        question: "what is the annual tuition".to_string(),
        answer: long_answer,
    }];
    engine.query("and for seniors?", &history).await.unwrap();

    let questions = answerer.questions.lock().unwrap();
    let prompt = questions.last().expect("answerer was called");
    assert!(prompt.contains("Previous: what is the annual tuition Answer: "));
    // Prior answers are clipped to 100 chars before entering the prompt.
    assert!(prompt.contains(&"y".repeat(100)));
    assert!(!prompt.contains(&"y".repeat(101)));
    assert!(prompt.ends_with("and for seniors?"));
}

#[tokio::test]
async fn second_build_request_is_rejected_while_one_runs() {
    let server = MockServer::start_async().await;
    mock_site(&server).await;
    let pdf_dir = tempfile::tempdir().expect("tempdir");

    let store = Arc::new(SqliteSessionStore::open_in_memory().await.unwrap());
    let engine = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        Arc::new(HashEmbedder::new(128)),
        store,
        Arc::new(StubAnswerer),
    );

    // The slot is claimed before the background task starts running.
    engine.start_build(BuildMode::ForceRebuild).unwrap();
    assert!(matches!(
        engine.start_build(BuildMode::ForceRebuild),
        Err(KbError::BuildInProgress)
    ));
    assert!(matches!(
        engine.run_build_now(BuildMode::ForceRebuild).await,
        Err(KbError::BuildInProgress)
    ));

    // Once the build releases the slot, new builds are accepted again.
    for _ in 0..200 {
        if !engine.status().building {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!engine.status().building, "build never released its slot");
    assert!(engine.is_ready());
    engine.run_build_now(BuildMode::ForceRebuild).await.unwrap();
}

#[tokio::test]
async fn empty_crawl_publishes_a_placeholder() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200)
                .header("content-type", "text/html")
                .body("<html><body><p>tiny</p></body></html>");
        })
        .await;
    let pdf_dir = tempfile::tempdir().expect("tempdir");

    let store = Arc::new(SqliteSessionStore::open_in_memory().await.unwrap());
    let engine = KnowledgeEngine::new(
        test_config(&server, pdf_dir.path()),
        Arc::new(HashEmbedder::new(64)),
        store,
        Arc::new(StubAnswerer),
    );
    engine.run_build_now(BuildMode::ForceRebuild).await.unwrap();

    let status = engine.status();
    assert!(status.ready);
    assert_eq!(status.pages_crawled, 0);
    assert_eq!(status.chunk_count, 1);

    let hits = engine.search("anything at all", 3).await;
    assert_eq!(hits.len(), 1);
    assert!(
        hits[0]
            .text
            .contains("No content could be extracted from this website")
    );
    let response = engine.query("hello?", &[]).await.unwrap();
    assert!(!response.answer.is_empty());
}
