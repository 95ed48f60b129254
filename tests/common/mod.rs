//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use docmark::provider::{HttpRequest, HttpResponse, Transport};
use docmark::{
    CapabilityError, DocumentKind, Engine, EngineConfig, Exporter, Extractor, JobId, JobRecord,
    JobState, KdfParams, ProviderError, ProviderKind, ProviderProfile,
};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const PASS: &str = "p@ss";

// ── Logging ──────────────────────────────────────────────────────────────────

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Configuration ────────────────────────────────────────────────────────────

pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

/// Small workers, millisecond backoff, cheap KDF, vault and output in `dir`.
pub fn config(dir: &Path, workers: usize) -> EngineConfig {
    EngineConfig::builder()
        .workers(workers)
        .max_attempts(3)
        .base_delay_ms(1)
        .max_delay_ms(20)
        .jitter_ratio(0.0)
        .vault_path(dir.join("profiles.enc"))
        .idle_timeout_secs(0)
        .kdf(fast_kdf())
        .output_dir(dir.join("out"))
        .build()
        .unwrap()
}

pub fn openai_profile() -> ProviderProfile {
    ProviderProfile::new("main", ProviderKind::OpenAi, "sk-test-secret-0001")
}

// ── Documents ────────────────────────────────────────────────────────────────

/// One-page PDF holding a single image XObject and no text: a plain scan.
pub fn write_scanned_pdf(path: &Path) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![0u8],
    ));
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"q 100 0 0 100 0 0 cm /Im1 Do Q\n".to_vec(),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

pub fn scanned_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    write_scanned_pdf(&path);
    path
}

// ── Transport ────────────────────────────────────────────────────────────────

/// Replays canned responses in order and records every request.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<HttpResponse>>,
    pub seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        self.seen.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NetworkFailure {
                detail: "script exhausted".into(),
            })
    }
}

pub fn reply(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        retry_after: None,
        body: body.to_string(),
    }
}

pub fn chat_ok(text: &str) -> HttpResponse {
    reply(
        200,
        &serde_json::json!({ "choices": [{ "message": { "content": text } }] }).to_string(),
    )
}

// ── Host capabilities ────────────────────────────────────────────────────────

/// Returns fixed text. When gated, each call waits for a permit first.
/// The first `failures` calls fail with a transient error instead.
pub struct FixedExtractor {
    text: String,
    pub calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    failures: AtomicUsize,
}

impl FixedExtractor {
    pub fn new(text: &str) -> Arc<Self> {
        Self::build(text, None, 0)
    }

    pub fn gated(text: &str, gate: Arc<Semaphore>) -> Arc<Self> {
        Self::build(text, Some(gate), 0)
    }

    pub fn gated_flaky(text: &str, gate: Arc<Semaphore>, failures: usize) -> Arc<Self> {
        Self::build(text, Some(gate), failures)
    }

    fn build(text: &str, gate: Option<Arc<Semaphore>>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            gate,
            failures: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl Extractor for FixedExtractor {
    async fn extract(
        &self,
        _path: &Path,
        _kind: DocumentKind,
        _trace_id: &str,
    ) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| CapabilityError::fatal(e.to_string()))?
                .forget();
        }
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(CapabilityError::transient("scanner busy"));
        }
        Ok(self.text.clone())
    }
}

/// Keeps exported Markdown in memory.
#[derive(Default)]
pub struct MemoryExporter {
    pub written: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl Exporter for MemoryExporter {
    async fn export(&self, markdown: &str, destination: &Path) -> Result<PathBuf, CapabilityError> {
        self.written
            .lock()
            .unwrap()
            .push((destination.to_path_buf(), markdown.to_string()));
        Ok(destination.to_path_buf())
    }
}

// ── Waiting ──────────────────────────────────────────────────────────────────

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(engine: &Engine, id: JobId) -> JobRecord {
    wait_until(engine, id, |r| r.state.is_terminal()).await
}

pub async fn wait_until(
    engine: &Engine,
    id: JobId,
    done: impl Fn(&JobRecord) -> bool,
) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(record) = engine.get_job(id) {
                if done(&record) {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {id} did not settle: {:?}", engine.get_job(id)))
}

pub fn is_state(state: JobState) -> impl Fn(&JobRecord) -> bool {
    move |r| r.state == state
}
