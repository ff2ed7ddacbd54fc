use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{AppConfig, EmbeddingProvider, IndexKind, LlmProvider};
use crate::metrics::{RunStats, TimedOperation};
use crate::retry::{RetryPolicy, RetryingEmbedder, RetryingIndex, RetryingModel};
use index::{
    Embedder, HashEmbedder, IndexBackend, OllamaEmbedder, OpenAiEmbedder, VectorIndex, build_index,
};
use ingest::{Chunk, IngestError};
use query::{AnswerRetriever, LanguageModel, OllamaModel, OpenAiChatModel};
use report::{
    QuestionCatalog, ReportTable, build_report, cleanup_stale_output, export_table, output_path,
    report_name, write_answers_log,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInput {
    Directory(PathBuf),
    File(PathBuf),
}

/// One folder (or one PDF) producing one spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub input: JobInput,
    /// Where the spreadsheet goes when no output directory is configured
    pub default_output_dir: PathBuf,
}

impl Job {
    pub fn path(&self) -> &Path {
        match &self.input {
            JobInput::Directory(p) | JobInput::File(p) => p,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        name: String,
        output: PathBuf,
        answers_log: Option<PathBuf>,
        table: ReportTable,
    },
    Skipped {
        name: String,
        reason: String,
    },
    Failed {
        name: String,
        error: String,
    },
}

/// How a directory argument is turned into jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discovery {
    /// Each immediate sub-directory, or the directory itself when it has none
    #[default]
    Subdirectories,
    /// Every folder at any depth that directly holds a PDF
    Recursive,
}

/// Jobs for `path`. A `.pdf` file is a job of its own.
pub fn discover_jobs(path: &Path, discovery: Discovery) -> Result<Vec<Job>> {
    if path.is_file() {
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            anyhow::bail!("{} is not a PDF file", path.display());
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        return Ok(vec![Job {
            name,
            input: JobInput::File(path.to_path_buf()),
            default_output_dir: parent,
        }]);
    }

    if !path.is_dir() {
        anyhow::bail!("{} does not exist", path.display());
    }

    let mut dirs = match discovery {
        Discovery::Subdirectories => subdirectories(path)?,
        Discovery::Recursive => pdf_folders(path)?,
    };

    if dirs.is_empty() {
        dirs.push(path.to_path_buf());
    }

    Ok(dirs
        .into_iter()
        .map(|dir| Job {
            name: report_name(&dir),
            default_output_dir: dir.clone(),
            input: JobInput::Directory(dir),
        })
        .collect())
}

fn subdirectories(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {}", path.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn pdf_folders(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk directory {}", path.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let has_pdf = ingest::PdfReader::list_pdfs(entry.path())
            .map(|files| !files.is_empty())
            .unwrap_or(false);
        if has_pdf {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Everything needed to turn folders of PDFs into reports.
pub struct Pipeline {
    config: AppConfig,
    catalog: QuestionCatalog,
    model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    // Unwrapped, for indexes that are retried as a whole
    bare_embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    stats: Arc<RunStats>,
}

impl Pipeline {
    /// `model` and `embedder` are wrapped in the configured retry policy here.
    pub fn new(
        config: AppConfig,
        catalog: QuestionCatalog,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            catalog,
            model: Arc::new(RetryingModel::new(model, retry.clone())),
            embedder: Arc::new(RetryingEmbedder::new(embedder.clone(), retry.clone())),
            bare_embedder: embedder,
            retry,
            stats: RunStats::new(),
        }
    }

    /// Build the service clients described by `config`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let catalog = match &config.catalog {
            Some(path) => QuestionCatalog::load(path)?,
            None => QuestionCatalog::builtin(),
        };
        info!(questions = catalog.len(), "Question catalog loaded");

        let model = build_model(&config)?;
        let embedder = build_embedder(&config)?;

        info!(
            llm = model.name(),
            model = model.model(),
            embedder = embedder.name(),
            "Pipeline ready"
        );
        Ok(Self::new(config, catalog, model, embedder))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    pub fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Run every job under `path` in order, handing each outcome to `on_outcome`
    /// as soon as it is known. A failing job is reported and the batch moves on,
    /// unless `batch.stop_on_fatal` is set and the failure is fatal.
    pub async fn run_batch<F>(
        &self,
        path: &Path,
        discovery: Discovery,
        mut on_outcome: F,
    ) -> Result<Vec<JobOutcome>>
    where
        F: FnMut(&JobOutcome) + Send,
    {
        let jobs = discover_jobs(path, discovery)?;
        info!(path = %path.display(), jobs = jobs.len(), "Starting batch");

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in &jobs {
            info!(job = %job.name, path = %job.path().display(), "Processing");

            let outcome = match self.run_job(job).await {
                Ok(outcome) => outcome,
                Err(e) if self.config.batch.stop_on_fatal && index::is_fatal(&e) => {
                    self.stats.record_failed();
                    return Err(e.context(format!("Batch aborted while processing {}", job.name)));
                }
                Err(e) => {
                    error!(job = %job.name, error = %format!("{:#}", e), "Directory failed");
                    self.stats.record_failed();
                    JobOutcome::Failed {
                        name: job.name.clone(),
                        error: format!("{:#}", e),
                    }
                }
            };

            on_outcome(&outcome);
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    pub async fn run_job(&self, job: &Job) -> Result<JobOutcome> {
        let output_dir = self
            .config
            .output
            .directory
            .clone()
            .unwrap_or_else(|| job.default_output_dir.clone());
        let output = output_path(&output_dir, &job.name, self.config.output.format);
        let answers_path = output_dir.join(format!("{}.answers.json", job.name));

        cleanup_stale_output(&output);
        if self.config.output.answers_log {
            cleanup_stale_output(&answers_path);
        }

        let timer = TimedOperation::start();
        let chunks = match self.load_chunks(job).await {
            Ok(chunks) => chunks,
            Err(e) if ingest::is_no_input(&e) => {
                warn!(reason = %e, "No PDFs found in {}. Skipping.", job.path().display());
                self.stats.record_skipped();
                return Ok(JobOutcome::Skipped {
                    name: job.name.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        self.stats.record_ingest(timer.elapsed(), chunks.len());

        let timer = TimedOperation::start();
        let index = self.build_index(job, chunks).await?;
        self.stats.record_index(timer.elapsed());

        let retriever = AnswerRetriever::new(index, self.model.clone(), self.config.retrieval.top_k);

        let timer = TimedOperation::start();
        let report = build_report(&self.catalog, &retriever).await?;
        let query_time = timer.elapsed();

        export_table(&report.table, &output, self.config.output.format)?;
        let answers_log = if self.config.output.answers_log {
            Some(write_answers_log(&report.answers, &answers_path)?)
        } else {
            None
        };
        self.stats.record_report(query_time, &report);

        Ok(JobOutcome::Completed {
            name: job.name.clone(),
            output,
            answers_log,
            table: report.table,
        })
    }

    async fn load_chunks(&self, job: &Job) -> Result<Vec<Chunk>> {
        let chunker = self.config.chunker();
        match &job.input {
            JobInput::Directory(dir) => ingest::load_and_split(dir, chunker).await,
            JobInput::File(file) => {
                let chunks = ingest::ingest_pdf(file, chunker).await?;
                if chunks.is_empty() {
                    return Err(IngestError::NoText(file.clone()).into());
                }
                Ok(chunks)
            }
        }
    }

    async fn build_index(&self, job: &Job, chunks: Vec<Chunk>) -> Result<Arc<dyn VectorIndex>> {
        let backend = match self.config.index.backend {
            IndexKind::Memory => IndexBackend::Memory,
            IndexKind::Qdrant => IndexBackend::Qdrant {
                url: self.config.index.qdrant_url.clone(),
                collection: collection_name(&self.config.index.collection_prefix, &job.name),
            },
        };

        // Retries sit on one layer: the embedder for the in-memory index, the
        // whole index (embedding included) for Qdrant.
        let index: Arc<dyn VectorIndex> = match &backend {
            IndexBackend::Memory => Arc::from(build_index(chunks, self.embedder.clone(), &backend).await?),
            IndexBackend::Qdrant { .. } => {
                let index = self
                    .retry
                    .retry("index.build", || {
                        build_index(chunks.clone(), self.bare_embedder.clone(), &backend)
                    })
                    .await?;
                Arc::new(RetryingIndex::new(Arc::from(index), self.retry.clone()))
            }
        };
        Ok(index)
    }
}

fn build_model(config: &AppConfig) -> Result<Arc<dyn LanguageModel>> {
    Ok(match config.llm.provider {
        LlmProvider::OpenAi => {
            let key = config.llm.api_key.clone().context("OPENAI_API_KEY is not set")?;
            Arc::new(OpenAiChatModel::new(
                config.llm.openai_url.clone(),
                config.llm.model.clone(),
                key,
                config.llm.temperature,
            ))
        }
        LlmProvider::Ollama => Arc::new(OllamaModel::new(
            config.llm.ollama_url.clone(),
            config.llm.model.clone(),
        )),
    })
}

fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    Ok(match config.embeddings.provider {
        EmbeddingProvider::OpenAi => {
            let key = config.llm.api_key.clone().context("OPENAI_API_KEY is not set")?;
            Arc::new(OpenAiEmbedder::new(
                config.llm.openai_url.clone(),
                config.embeddings.model.clone(),
                key,
            ))
        }
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
            config.llm.ollama_url.clone(),
            config.embeddings.model.clone(),
        )),
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::default()),
    })
}

/// Qdrant collection names: letters, digits, `_` and `-`.
fn collection_name(prefix: &str, job_name: &str) -> String {
    let suffix: String = job_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ParkingModel, RecoveringModel, RevokedKeyModel, pipeline, test_config, write_parking_pdf,
    };
    use async_trait::async_trait;
    use index::ServiceError;
    use report::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_discover_subdirectories_sorted() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("site-b")).unwrap();
        std::fs::create_dir(root.path().join("site-a")).unwrap();
        std::fs::write(root.path().join("loose.pdf"), b"%PDF").unwrap();

        let jobs = discover_jobs(root.path(), Discovery::Subdirectories).unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["site-a", "site-b"]);
        assert_eq!(jobs[0].default_output_dir, root.path().join("site-a"));
    }

    #[test]
    fn test_discover_falls_back_to_directory_itself() {
        let root = tempfile::tempdir().unwrap();
        let site = root.path().join("site-a");
        std::fs::create_dir(&site).unwrap();

        let jobs = discover_jobs(&site, Discovery::Subdirectories).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].input, JobInput::Directory(site.clone()));
        assert_eq!(jobs[0].name, "site-a");
    }

    #[test]
    fn test_discover_single_pdf() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("Tower EAS.PDF");
        std::fs::write(&file, b"%PDF").unwrap();

        let jobs = discover_jobs(&file, Discovery::Subdirectories).unwrap();
        assert_eq!(jobs[0].name, "Tower EAS");
        assert_eq!(jobs[0].input, JobInput::File(file));
        assert_eq!(jobs[0].default_output_dir, root.path());

        let txt = root.path().join("notes.txt");
        std::fs::write(&txt, b"x").unwrap();
        assert!(discover_jobs(&txt, Discovery::Recursive).is_err());
        assert!(discover_jobs(&root.path().join("missing"), Discovery::Subdirectories).is_err());
    }

    #[test]
    fn test_collection_name_is_sanitised() {
        assert_eq!(collection_name("edi_chunks", "Site A (2024)"), "edi_chunks_Site_A__2024_");
    }

    #[tokio::test]
    async fn test_batch_skips_folders_without_pdfs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("empty")).unwrap();
        std::fs::write(root.path().join("empty").join("readme.txt"), "nothing").unwrap();
        write_parking_pdf(&root.path().join("site-a"));

        let mut config = test_config();
        config.output.answers_log = true;
        let pipeline = pipeline(config, Arc::new(ParkingModel));

        let mut seen = Vec::new();
        let outcomes = pipeline
            .run_batch(root.path(), Discovery::Subdirectories, |o| {
                seen.push(match o {
                    JobOutcome::Completed { name, .. }
                    | JobOutcome::Skipped { name, .. }
                    | JobOutcome::Failed { name, .. } => name.clone(),
                })
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["empty", "site-a"]);
        assert!(matches!(&outcomes[0], JobOutcome::Skipped { reason, .. } if reason.contains("No PDF files found")));

        let JobOutcome::Completed { output, answers_log, table, .. } = &outcomes[1] else {
            panic!("site-a should complete");
        };
        let row = table.get("Parking Space").unwrap();
        assert_eq!(row.no_action, Cell::Value(42.0));
        assert_eq!(row.with_action, Cell::Value(10.0));
        assert_eq!(output, &root.path().join("site-a").join("site-a.csv"));
        assert!(output.exists());
        assert!(answers_log.as_ref().unwrap().exists());

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.directories_processed, 1);
        assert_eq!(stats.directories_skipped, 1);
        assert_eq!(stats.values_found, 2);
    }

    #[tokio::test]
    async fn test_stale_output_replaced_in_output_dir() {
        let root = tempfile::tempdir().unwrap();
        let site = root.path().join("site-a");
        write_parking_pdf(&site);
        let out_dir = root.path().join("results");
        std::fs::create_dir(&out_dir).unwrap();
        std::fs::write(out_dir.join("site-a.csv"), "stale").unwrap();

        let mut config = test_config();
        config.output.directory = Some(out_dir.clone());
        let pipeline = pipeline(config, Arc::new(ParkingModel));

        pipeline.run_batch(&site, Discovery::Subdirectories, |_| {}).await.unwrap();

        let written = std::fs::read_to_string(out_dir.join("site-a.csv")).unwrap();
        assert!(written.starts_with("Component,No Action,With Action,Units"));
        assert!(!site.join("site-a.csv").exists());
    }

    #[test]
    fn test_recursive_discovery_finds_nested_pdf_folders() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("empty")).unwrap();
        let nested = root.path().join("region").join("site-a");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("eas.pdf"), b"%PDF").unwrap();
        std::fs::create_dir(root.path().join("site-b")).unwrap();
        std::fs::write(root.path().join("site-b").join("eas.pdf"), b"%PDF").unwrap();

        let jobs = discover_jobs(root.path(), Discovery::Recursive).unwrap();
        let dirs: Vec<&Path> = jobs.iter().map(Job::path).collect();
        assert_eq!(dirs, vec![nested.as_path(), root.path().join("site-b").as_path()]);
        assert_eq!(jobs[0].name, "site-a");

        let shallow = discover_jobs(root.path(), Discovery::Subdirectories).unwrap();
        let names: Vec<&str> = shallow.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["empty", "region", "site-b"]);
    }

    #[test]
    fn test_recursive_discovery_without_pdfs_is_the_path_itself() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("empty")).unwrap();

        let jobs = discover_jobs(root.path(), Discovery::Recursive).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].path(), root.path());
    }

    #[tokio::test]
    async fn test_fatal_failure_fails_directory_and_batch_continues() {
        let root = tempfile::tempdir().unwrap();
        write_parking_pdf(&root.path().join("site-a"));
        write_parking_pdf(&root.path().join("site-b"));

        let pipeline = pipeline(test_config(), Arc::new(RecoveringModel::default()));
        let outcomes = pipeline
            .run_batch(root.path(), Discovery::Subdirectories, |_| {})
            .await
            .unwrap();

        assert!(matches!(&outcomes[0], JobOutcome::Failed { name, error } if name == "site-a" && error.contains("401")));
        assert!(matches!(&outcomes[1], JobOutcome::Completed { name, .. } if name == "site-b"));
        assert!(!root.path().join("site-a").join("site-a.csv").exists());
        assert!(root.path().join("site-b").join("site-b.csv").exists());

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.directories_failed, 1);
        assert_eq!(stats.directories_processed, 1);
    }

    #[tokio::test]
    async fn test_stop_on_fatal_ends_batch() {
        let root = tempfile::tempdir().unwrap();
        write_parking_pdf(&root.path().join("site-a"));
        write_parking_pdf(&root.path().join("site-b"));

        let mut config = test_config();
        config.batch.stop_on_fatal = true;
        let pipeline = pipeline(config, Arc::new(RevokedKeyModel));
        let mut seen = 0;
        let err = pipeline
            .run_batch(root.path(), Discovery::Subdirectories, |_| seen += 1)
            .await
            .unwrap_err();

        assert!(index::is_fatal(&err));
        assert_eq!(seen, 0);
        assert!(!root.path().join("site-b").join("site-b.csv").exists());
    }

    #[tokio::test]
    async fn test_failed_export_is_not_counted_as_processed() {
        let root = tempfile::tempdir().unwrap();
        let site = root.path().join("site-a");
        write_parking_pdf(&site);
        let not_a_dir = root.path().join("results");
        std::fs::write(&not_a_dir, "file in the way").unwrap();

        let mut config = test_config();
        config.output.directory = Some(not_a_dir.join("nested"));
        let pipeline = pipeline(config, Arc::new(ParkingModel));

        let outcomes = pipeline.run_batch(&site, Discovery::Subdirectories, |_| {}).await.unwrap();
        assert!(matches!(&outcomes[0], JobOutcome::Failed { .. }));

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.directories_processed, 0);
        assert_eq!(stats.directories_failed, 1);
        assert_eq!(stats.questions_asked, 0);
    }

    /// Bulk embedding works; every single-text (query) embedding fails transiently.
    struct QueryOutageEmbedder {
        inner: HashEmbedder,
        query_calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for QueryOutageEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Transient {
                service: "embeddings",
                message: "503".into(),
            }
            .into())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.inner.embed_batch(texts).await
        }

        fn name(&self) -> &str {
            "outage"
        }
    }

    async fn fake_qdrant() -> String {
        use axum::Router;
        use axum::routing::{delete, post, put};

        let app = Router::new()
            .route(
                "/collections/:name",
                delete(|| async { r#"{"result":true}"# }).put(|| async { r#"{"result":true}"# }),
            )
            .route("/collections/:name/points", put(|| async { r#"{"result":{}}"# }))
            .route(
                "/collections/:name/points/search",
                post(|| async { axum::Json(serde_json::json!({ "result": [] })) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_qdrant_search_is_retried_on_one_layer() {
        let root = tempfile::tempdir().unwrap();
        let site = root.path().join("site-a");
        write_parking_pdf(&site);

        let mut config = test_config();
        config.index.backend = IndexKind::Qdrant;
        config.index.qdrant_url = fake_qdrant().await;
        config.retry.max_retries = 2;
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 1;

        let embedder = Arc::new(QueryOutageEmbedder {
            inner: HashEmbedder::default(),
            query_calls: AtomicUsize::new(0),
        });
        let catalog = QuestionCatalog::builtin();
        let questions = catalog.len();
        let pipeline = Pipeline::new(config, catalog, Arc::new(ParkingModel), embedder.clone());

        let outcomes = pipeline.run_batch(&site, Discovery::Subdirectories, |_| {}).await.unwrap();
        assert!(matches!(&outcomes[0], JobOutcome::Completed { .. }));

        // One attempt plus two retries per question, not three times three
        assert_eq!(embedder.query_calls.load(Ordering::SeqCst), questions * 3);
        assert_eq!(pipeline.stats().snapshot().service_failures, questions);
    }
}
