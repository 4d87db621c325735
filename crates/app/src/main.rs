use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use clinical_rag_core::{
    discover_documents, open_index, ClinicalRetriever, DocumentSource, ExtraMetadata,
    GenerationBackend, IngestionPipeline, LocalDocumentSource, MetadataFilter, OllamaClient,
    PiiScrubber, ReportGenerator, ReportType, Settings, VectorIndex,
};
use clinical_rag_core::models::keys;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONNECTION_PROBE: &str =
    "Patient seen on 01/15/2025. Callback 555-123-4567, SSN 123-45-6789.";

#[derive(Parser)]
#[command(name = "clinical-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file; defaults apply when it does not exist.
    #[arg(long, env = "CLINICAL_RAG_CONFIG", default_value = "clinical-rag.toml", global = true)]
    config: PathBuf,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_BASE_URL", global = true)]
    ollama_url: Option<String>,

    /// Directory of the local vector index
    #[arg(long, env = "VECTOR_PERSIST_DIR", global = true)]
    persist_dir: Option<PathBuf>,

    /// Vector collection name
    #[arg(long, env = "VECTOR_COLLECTION", global = true)]
    collection: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every supported document under a folder, recursively.
    Ingest {
        #[arg(long)]
        folder: PathBuf,
        /// Patient identifier attached to every chunk.
        #[arg(long)]
        patient_id: Option<String>,
        /// Fiscal year label attached to every chunk.
        #[arg(long)]
        fiscal_year: Option<String>,
    },
    /// Ingest every year and patient folder of the configured data source.
    IngestSource,
    /// Return the chunks most relevant to a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        patient_id: Option<String>,
    },
    /// Generate a clinical report from indexed documents.
    Report {
        /// Free-text retrieval query; a patient summary query is used when omitted.
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value = "full_summary")]
        report_type: ReportType,
        #[arg(long)]
        patient_id: Option<String>,
        /// Extra instruction appended to the generation prompt.
        #[arg(long)]
        instruction: Option<String>,
    },
    /// Show index statistics.
    Stats,
    /// Delete chunks by source file name and/or patient identifier.
    Delete {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        patient_id: Option<String>,
    },
    /// Switch between the mock data tree and the mounted share.
    DataSource {
        #[arg(value_enum)]
        mode: DataSourceMode,
    },
    /// Check the document source and entity recognizer end to end.
    CheckConnection,
}

#[derive(Clone, Copy, ValueEnum)]
enum DataSourceMode {
    Mock,
    Real,
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(url) = &cli.ollama_url {
        settings.generation.base_url = url.clone();
    }
    if let Some(dir) = &cli.persist_dir {
        settings.index.persist_dir = Some(dir.clone());
    }
    if let Some(collection) = &cli.collection {
        settings.index.collection = collection.clone();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "clinical-rag boot"
    );

    match cli.command {
        Command::Ingest {
            folder,
            patient_id,
            fiscal_year,
        } => ingest_folder(&settings, &folder, patient_id, fiscal_year).await,
        Command::IngestSource => ingest_source(&settings).await,
        Command::Search {
            query,
            top_k,
            patient_id,
        } => search(&settings, &query, top_k, patient_id.as_deref()).await,
        Command::Report {
            query,
            report_type,
            patient_id,
            instruction,
        } => {
            report(
                &settings,
                query.as_deref(),
                report_type,
                patient_id.as_deref(),
                instruction.as_deref(),
            )
            .await
        }
        Command::Stats => stats(&settings).await,
        Command::Delete { source, patient_id } => delete(&settings, source, patient_id).await,
        Command::DataSource { mode } => data_source(&cli.config, mode),
        Command::CheckConnection => Ok(check_connection(&settings).await),
    }
}

async fn ingest_folder(
    settings: &Settings,
    folder: &Path,
    patient_id: Option<String>,
    fiscal_year: Option<String>,
) -> anyhow::Result<ExitCode> {
    let files = discover_documents(folder);
    if files.is_empty() {
        anyhow::bail!("no supported documents found in {}", folder.display());
    }

    let index = open_index(&settings.index).await?;
    let pipeline = IngestionPipeline::from_settings(settings, index)?;
    if !pipeline.redacts() {
        warn!("redaction disabled, chunks are indexed as extracted");
    }

    let extra = ExtraMetadata {
        fiscal_year,
        patient_id,
        ..ExtraMetadata::default()
    };
    let mut added = 0usize;
    let mut failed = 0usize;
    for path in &files {
        let outcome = pipeline.ingest_document(path, None, &extra).await;
        if outcome.success {
            added += outcome.chunks_added;
        } else {
            failed += 1;
            println!(
                "failed: {} ({})",
                path.display(),
                outcome.error.unwrap_or_default()
            );
        }
    }

    println!(
        "{} documents, {} failed, {} chunks ingested at {}",
        files.len(),
        failed,
        added,
        Utc::now().to_rfc3339()
    );
    Ok(exit_for(failed == 0))
}

async fn ingest_source(settings: &Settings) -> anyhow::Result<ExitCode> {
    let source = LocalDocumentSource::new(settings.active_root()?)?;
    let index = open_index(&settings.index).await?;
    let pipeline = IngestionPipeline::from_settings(settings, index)?;

    let report = pipeline.ingest_source(&source).await?;
    for failure in &report.failures {
        println!("failed: {} ({})", failure.path.display(), failure.reason);
    }
    println!(
        "patients={} documents={} failed={} chunks={}",
        report.patients, report.documents, report.failed, report.chunks
    );
    Ok(exit_for(report.failed == 0))
}

async fn search(
    settings: &Settings,
    query: &str,
    top_k: Option<usize>,
    patient_id: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let retriever = ClinicalRetriever::new(
        open_index(&settings.index).await?,
        settings.retrieval.clone(),
    );
    let results = match patient_id {
        Some(patient_id) => retriever.retrieve_for_patient(query, patient_id, top_k).await?,
        None => retriever.retrieve(query, top_k, None).await?,
    };

    println!("query: {query}");
    if results.is_empty() {
        println!("no results above relevance threshold {}", settings.retrieval.relevance_threshold);
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "[{}] relevance={:.4} source={} id={}",
            rank + 1,
            result.relevance_score(),
            result.source(),
            result.doc_id
        );
        println!("{}\n", result.text);
    }
    Ok(ExitCode::SUCCESS)
}

async fn report(
    settings: &Settings,
    query: Option<&str>,
    report_type: ReportType,
    patient_id: Option<&str>,
    instruction: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let retriever = ClinicalRetriever::new(
        open_index(&settings.index).await?,
        settings.retrieval.clone(),
    );

    let backend: Option<Arc<dyn GenerationBackend>> = if settings.generation.enabled {
        match OllamaClient::connect(&settings.generation).await {
            Ok(Some(client)) => Some(Arc::new(client)),
            Ok(None) => {
                warn!("generation backend unavailable, using structured reports");
                None
            }
            Err(error) => {
                warn!(error = %error, "generation backend misconfigured, using structured reports");
                None
            }
        }
    } else {
        None
    };

    let generator = ReportGenerator::new(retriever, backend, settings.generation.clone());
    let query = query.unwrap_or(clinical_rag_core::report::PATIENT_SUMMARY_QUERY);
    let report = generator
        .generate_report(query, report_type, patient_id, instruction)
        .await?;

    println!("{}", report.content);
    println!();
    println!(
        "report_type={} mode={:?} context_used={} retrieved={} chars_used={}",
        report.report_type,
        report.metadata.mode,
        report.context_used,
        report.metadata.total_retrieved,
        report.metadata.chars_used
    );
    if !report.sources.is_empty() {
        println!("sources: {}", report.sources.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

async fn stats(settings: &Settings) -> anyhow::Result<ExitCode> {
    let index = open_index(&settings.index).await?;
    let count = index.count().await?;
    println!("collection={}", settings.index.collection);
    println!("backend={:?}", settings.index.backend);
    println!("chunks={count}");
    match &settings.index.persist_dir {
        Some(dir) => println!("persist_dir={}", dir.display()),
        None => println!("persist_dir=<in-memory>"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn delete(
    settings: &Settings,
    source: Option<String>,
    patient_id: Option<String>,
) -> anyhow::Result<ExitCode> {
    let mut filter = MetadataFilter::default();
    if let Some(source) = source {
        filter = filter.and(keys::SOURCE, source);
    }
    if let Some(patient_id) = patient_id {
        filter = filter.and(keys::PATIENT_ID, patient_id);
    }
    if filter.is_empty() {
        anyhow::bail!("pass --source and/or --patient-id");
    }

    let index = open_index(&settings.index).await?;
    let before = index.count().await?;
    index.delete(&filter).await?;
    let after = index.count().await?;
    println!("deleted {} chunks, {} remain", before.saturating_sub(after), after);
    Ok(ExitCode::SUCCESS)
}

fn data_source(config: &Path, mode: DataSourceMode) -> anyhow::Result<ExitCode> {
    let settings = match mode {
        DataSourceMode::Mock => Settings::set_use_mock(config, true)?,
        DataSourceMode::Real => Settings::set_use_mock(config, false)?,
        DataSourceMode::Status => Settings::load(config)?,
    };

    let label = if settings.data_source.use_mock { "mock" } else { "real" };
    println!("data source: {label}");
    match settings.active_root() {
        Ok(root) => println!("root: {}", root.display()),
        Err(error) => println!("root: not configured ({error})"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn check_connection(settings: &Settings) -> ExitCode {
    let mut passed = true;

    println!("[1/2] document source");
    match probe_source(settings) {
        Ok((years, patients, files)) => println!(
            "PASS years={years} patients_in_latest_year={patients} files_of_first_patient={files}"
        ),
        Err(error) => {
            passed = false;
            println!("FAIL {error:#}");
        }
    }

    println!("[2/2] entity recognizer");
    match probe_recognizer(settings).await {
        Ok(entities) => println!("PASS entities_redacted={entities}"),
        Err(error) => {
            passed = false;
            println!("FAIL {error:#}");
        }
    }

    exit_for(passed)
}

fn probe_source(settings: &Settings) -> anyhow::Result<(usize, usize, usize)> {
    let source = LocalDocumentSource::new(settings.active_root()?)?;
    let years = source.list_years()?;
    let Some(latest) = years.first() else {
        return Ok((0, 0, 0));
    };
    let patients = source.list_patients(latest)?;
    let files = match patients.first() {
        Some(patient) => source.file_count(latest, patient)?,
        None => 0,
    };
    Ok((years.len(), patients.len(), files))
}

async fn probe_recognizer(settings: &Settings) -> anyhow::Result<usize> {
    let scrubber = match PiiScrubber::from_settings(&settings.redaction)? {
        Some(scrubber) => scrubber,
        None => PiiScrubber::local(settings.redaction.profile, settings.redaction.score_threshold)?,
    };
    let result = scrubber.scrub(CONNECTION_PROBE).await?;
    if result.scrubbed_text.contains("123-45-6789") {
        anyhow::bail!("probe SSN survived redaction");
    }
    Ok(result.entities_found)
}

fn exit_for(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
