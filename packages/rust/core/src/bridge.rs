//! Generative-model bridge.
//!
//! Spawns the provider subprocess, sends generation tasks via a JSON-lines
//! stdin/stdout protocol, and caches results in storage. One bridge serves
//! analysis, outlining, article and FAQ generation, and video and reference
//! lookup.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use postforge_shared::{
    CompetitorAnalysis, FaqItem, GapAnalysis, GeneratedDocument, GenerationConfig,
    GenerationRequest, Outline, PostforgeError, PriorArticle, Reference, Result, VideoEmbed,
    expand_home, read_secret,
};
use postforge_storage::Storage;

use crate::collaborators::{ContentAnalyzer, ContentGenerator, MediaFinder, ReferenceFinder};

/// Article text sent as context is cut to this many characters.
const CONTEXT_MAX_CHARS: usize = 12_000;

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Task types understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AnalyzeGaps,
    AnalyzeCompetitors,
    BuildOutline,
    GenerateArticle,
    GenerateFaq,
    FindVideo,
    FindReferences,
}

impl TaskType {
    /// Storage key for the generation cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzeGaps => "analyze_gaps",
            Self::AnalyzeCompetitors => "analyze_competitors",
            Self::BuildOutline => "build_outline",
            Self::GenerateArticle => "generate_article",
            Self::GenerateFaq => "generate_faq",
            Self::FindVideo => "find_video",
            Self::FindReferences => "find_references",
        }
    }
}

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Task {
        id: String,
        task_type: TaskType,
        model: &'a str,
        payload: &'a serde_json::Value,
    },
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result { id: String, result: BridgeResult },
    Error { id: String, error: String },
}

/// Task output from the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResult {
    /// Task-specific JSON, decoded by the caller.
    pub output: serde_json::Value,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Configuration and stats
// ---------------------------------------------------------------------------

/// How to launch and talk to the bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: String,
    /// Model identifier, sent with each task and used as a cache key.
    pub model: String,
    /// Environment variables passed to the child (e.g. the provider key).
    pub env: Vec<(String, String)>,
    /// Limit for spawn-to-ready and for each task round trip.
    pub task_timeout: Duration,
}

impl BridgeConfig {
    /// Derive the launch command from `[generation]` config; the API key is
    /// read from the configured environment variable.
    pub fn from_generation(config: &GenerationConfig) -> Result<Self> {
        let api_key = read_secret(&config.api_key_env)?;
        Ok(Self {
            command: config.bridge_cmd.clone(),
            args: vec!["run".into(), config.bridge_script.clone()],
            working_dir: expand_home(&config.working_dir).display().to_string(),
            model: config.model.clone(),
            env: vec![(config.api_key_env.clone(), api_key)],
            task_timeout: Duration::from_secs(config.task_timeout_secs),
        })
    }
}

/// Running totals across all tasks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeStats {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub failures: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Handle to the spawned bridge subprocess.
struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
    /// Set while a task is written but its reply not yet read.
    in_flight: bool,
}

impl BridgeHandle {
    /// Spawn the bridge subprocess and wait for its ready signal.
    async fn spawn(config: &BridgeConfig) -> Result<Self> {
        info!(cmd = %config.command, args = ?config.args, "spawning generation bridge");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .current_dir(&config.working_dir)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit()) // Bridge logs go to parent stderr
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PostforgeError::Generation(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.command
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            PostforgeError::Generation("failed to capture bridge stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            PostforgeError::Generation("failed to capture bridge stdout".into())
        })?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
            in_flight: false,
        };
        handle.wait_for_ready().await?;
        Ok(handle)
    }

    async fn read_message(&mut self) -> Result<(ResponseMessage, String)> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| PostforgeError::Generation(format!("bridge read error: {e}")))?;
        if n == 0 {
            return Err(PostforgeError::Generation(
                "bridge closed stdout unexpectedly".into(),
            ));
        }
        let msg = serde_json::from_str(line.trim()).map_err(|e| {
            PostforgeError::Generation(format!(
                "invalid bridge message: {e} (got: {})",
                truncate_chars(line.trim(), 200)
            ))
        })?;
        Ok((msg, line))
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message().await? {
            (ResponseMessage::Ready, _) => {
                info!("bridge is ready");
                Ok(())
            }
            (_, line) => Err(PostforgeError::Generation(format!(
                "expected ready message, got: {}",
                truncate_chars(line.trim(), 200)
            ))),
        }
    }

    async fn write_line(&mut self, json: &str) -> Result<()> {
        let write_err =
            |e: std::io::Error| PostforgeError::Generation(format!("failed to write to bridge stdin: {e}"));
        self.stdin.write_all(json.as_bytes()).await.map_err(write_err)?;
        self.stdin.write_all(b"\n").await.map_err(write_err)?;
        self.stdin
            .flush()
            .await
            .map_err(|e| PostforgeError::Generation(format!("failed to flush bridge stdin: {e}")))
    }

    /// Send a task and wait for its response.
    ///
    /// The outer error is a transport failure; the inner one is an error the
    /// provider reported, after which the process is still usable.
    async fn send_task(
        &mut self,
        task_type: TaskType,
        model: &str,
        payload: &serde_json::Value,
    ) -> Result<std::result::Result<BridgeResult, String>> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        let request = RequestMessage::Task {
            id: id.clone(),
            task_type,
            model,
            payload,
        };
        let json = serde_json::to_string(&request).map_err(|e| {
            PostforgeError::Generation(format!("failed to serialize request: {e}"))
        })?;
        self.in_flight = true;
        self.write_line(&json).await?;

        let reply = self.read_message().await?;
        self.in_flight = false;
        match reply {
            (ResponseMessage::Result { id: resp_id, result }, _) if resp_id == id => Ok(Ok(result)),
            (ResponseMessage::Error { id: resp_id, error }, _) if resp_id == id => Ok(Err(error)),
            (ResponseMessage::Result { id: resp_id, .. } | ResponseMessage::Error { id: resp_id, .. }, _) => {
                Err(PostforgeError::Generation(format!(
                    "bridge answered {resp_id}, expected {id}"
                )))
            }
            (ResponseMessage::Ready, _) => Err(PostforgeError::Generation(
                "unexpected ready message during generation".into(),
            )),
        }
    }

    /// Send shutdown and wait for the bridge to exit.
    async fn shutdown(mut self) {
        if let Ok(json) = serde_json::to_string(&RequestMessage::Shutdown) {
            let _ = self.write_line(&json).await;
        }
        match self.child.wait().await {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Public bridge API
// ---------------------------------------------------------------------------

/// Compute a prompt hash for cache keying.
fn prompt_hash(content: &str, task_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(task_type.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cut `s` to at most `max_chars` characters.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate long context, marking the cut.
fn truncate_content(content: &str, max_chars: usize) -> String {
    let truncated = truncate_chars(content, max_chars);
    if truncated.len() == content.len() {
        content.to_string()
    } else {
        format!("{truncated}\n\n[... content truncated for model context window ...]")
    }
}

/// Lazily spawned, cached connection to the generation subprocess.
///
/// The process starts on the first cache miss. A failed or timed-out task
/// drops the process; the next task spawns a fresh one.
pub struct GenerationBridge {
    config: BridgeConfig,
    storage: Option<Arc<Storage>>,
    handle: Mutex<Option<BridgeHandle>>,
    stats: std::sync::Mutex<BridgeStats>,
}

impl GenerationBridge {
    pub fn new(config: BridgeConfig, storage: Option<Arc<Storage>>) -> Self {
        Self {
            config,
            storage,
            handle: Mutex::new(None),
            stats: std::sync::Mutex::new(BridgeStats::default()),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut BridgeStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    /// Run one task, consulting the cache first.
    #[instrument(skip_all, fields(task = task_type.as_str()))]
    pub async fn run_task<T: DeserializeOwned>(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Result<T> {
        let payload_json = payload.to_string();
        let hash = prompt_hash(&payload_json, task_type.as_str());

        if let Some(storage) = &self.storage {
            if let Some(cached) = storage
                .get_generation_cache(task_type.as_str(), &hash, &self.config.model)
                .await?
            {
                match serde_json::from_str::<T>(&cached) {
                    Ok(value) => {
                        self.record(|s| s.cache_hits += 1);
                        debug!("generation cache hit");
                        return Ok(value);
                    }
                    Err(e) => warn!(error = %e, "ignoring unreadable cache entry"),
                }
            }
        }

        let started = Instant::now();
        let result = match self.call(task_type, &payload).await {
            Ok(result) => result,
            Err(e) => {
                self.record(|s| s.failures += 1);
                return Err(e);
            }
        };
        self.record(|s| {
            s.cache_misses += 1;
            s.tokens_in += result.tokens_in;
            s.tokens_out += result.tokens_out;
        });

        let value: T = serde_json::from_value(result.output.clone()).map_err(|e| {
            PostforgeError::Generation(format!(
                "{} returned an unexpected shape: {e}",
                task_type.as_str()
            ))
        })?;

        if let Some(storage) = &self.storage {
            if let Err(e) = storage
                .set_generation_cache(
                    task_type.as_str(),
                    &hash,
                    &self.config.model,
                    &result.output.to_string(),
                )
                .await
            {
                warn!(error = %e, "failed to cache generation result");
            }
        }

        info!(
            model = %result.model,
            tokens_in = result.tokens_in,
            tokens_out = result.tokens_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation task complete"
        );
        Ok(value)
    }

    /// Round-trip one task through the subprocess under the task timeout.
    async fn call(&self, task_type: TaskType, payload: &serde_json::Value) -> Result<BridgeResult> {
        let mut guard = self.handle.lock().await;
        let timeout = self.config.task_timeout;

        // A caller dropped mid-task leaves an unread reply on the pipe.
        if guard.as_ref().is_some_and(|h| h.in_flight) {
            warn!("discarding bridge with an abandoned task in flight");
            guard.take();
        }

        let outcome = tokio::time::timeout(timeout, async {
            if guard.is_none() {
                *guard = Some(BridgeHandle::spawn(&self.config).await?);
            }
            match guard.as_mut() {
                Some(handle) => handle.send_task(task_type, &self.config.model, payload).await,
                None => Err(PostforgeError::Generation("bridge not running".into())),
            }
        })
        .await;

        match outcome {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(provider_error))) => Err(PostforgeError::Generation(format!(
                "{} failed: {provider_error}",
                task_type.as_str()
            ))),
            Ok(Err(e)) => {
                // Protocol state is unknown after a transport failure.
                guard.take();
                Err(e)
            }
            Err(_) => {
                guard.take();
                Err(PostforgeError::Generation(format!(
                    "{} timed out after {}s",
                    task_type.as_str(),
                    timeout.as_secs_f64()
                )))
            }
        }
    }

    /// Stop the subprocess if it is running.
    pub async fn shutdown(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        let stats = self.stats();
        info!(
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            failures = stats.failures,
            tokens_in = stats.tokens_in,
            tokens_out = stats.tokens_out,
            "generation bridge stopped"
        );
    }
}

fn article_context(document: &GeneratedDocument) -> String {
    truncate_content(&document.plain_text(), CONTEXT_MAX_CHARS)
}

// ---------------------------------------------------------------------------
// Collaborator implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl ContentAnalyzer for GenerationBridge {
    async fn analyze_gaps(&self, keyword: &str, prior: &[PriorArticle]) -> Result<GapAnalysis> {
        let prior: Vec<serde_json::Value> = prior
            .iter()
            .map(|a| serde_json::json!({"title": a.title, "keyword": a.keyword, "excerpt": a.excerpt}))
            .collect();
        self.run_task(
            TaskType::AnalyzeGaps,
            serde_json::json!({"keyword": keyword, "prior_articles": prior}),
        )
        .await
    }

    async fn analyze_competitors(&self, keyword: &str) -> Result<CompetitorAnalysis> {
        self.run_task(
            TaskType::AnalyzeCompetitors,
            serde_json::json!({"keyword": keyword}),
        )
        .await
    }
}

#[async_trait]
impl ContentGenerator for GenerationBridge {
    async fn build_outline(
        &self,
        keyword: &str,
        title: &str,
        gaps: Option<&GapAnalysis>,
        competitors: Option<&CompetitorAnalysis>,
    ) -> Result<Outline> {
        self.run_task(
            TaskType::BuildOutline,
            serde_json::json!({
                "keyword": keyword,
                "title": title,
                "gaps": gaps,
                "competitors": competitors,
            }),
        )
        .await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedDocument> {
        let payload = serde_json::to_value(request).map_err(|e| {
            PostforgeError::Generation(format!("failed to serialize request: {e}"))
        })?;
        self.run_task(TaskType::GenerateArticle, payload).await
    }

    async fn generate_faq(
        &self,
        keyword: &str,
        document: &GeneratedDocument,
    ) -> Result<Vec<FaqItem>> {
        self.run_task(
            TaskType::GenerateFaq,
            serde_json::json!({"keyword": keyword, "article": article_context(document)}),
        )
        .await
    }
}

#[async_trait]
impl MediaFinder for GenerationBridge {
    async fn find_video(&self, keyword: &str) -> Result<Option<VideoEmbed>> {
        self.run_task(TaskType::FindVideo, serde_json::json!({"keyword": keyword}))
            .await
    }
}

#[async_trait]
impl ReferenceFinder for GenerationBridge {
    async fn find_references(
        &self,
        keyword: &str,
        document: &GeneratedDocument,
    ) -> Result<Vec<Reference>> {
        self.run_task(
            TaskType::FindReferences,
            serde_json::json!({"keyword": keyword, "article": article_context(document)}),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
