use clinical_rag_core::{
    ChunkingConfig, ClinicalRetriever, ExtraMetadata, FixedSizeChunker, GenerationConfig,
    GenerationMode, IngestionPipeline, LocalVectorIndex, PiiScrubber, ReportGenerator, ReportType,
    RetrievalConfig, ScrubberProfile, VectorIndex,
};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

fn pipeline(
    index: Arc<LocalVectorIndex>,
    scrubber: Option<PiiScrubber>,
) -> Result<IngestionPipeline, Box<dyn std::error::Error>> {
    let chunker = FixedSizeChunker::new(ChunkingConfig {
        chunk_size: 500,
        chunk_overlap: 50,
        min_chunk_size: 20,
    })?;
    Ok(IngestionPipeline::new(Box::new(chunker), scrubber, index))
}

fn generator(index: Arc<LocalVectorIndex>, relevance_threshold: f64) -> ReportGenerator {
    let retriever = ClinicalRetriever::new(
        index,
        RetrievalConfig {
            relevance_threshold,
            ..RetrievalConfig::default()
        },
    );
    ReportGenerator::new(retriever, None, GenerationConfig::default())
}

#[tokio::test]
async fn ssn_never_reaches_the_index() -> Result<(), Box<dyn std::error::Error>> {
    let index = Arc::new(LocalVectorIndex::in_memory("e2e"));
    let scrubber = PiiScrubber::local(ScrubberProfile::Default, 0.5)?;
    let pipeline = pipeline(index.clone(), Some(scrubber))?;

    let outcome = pipeline
        .ingest_document(
            Path::new("intake_form.txt"),
            Some(b"Intake completed. Insurance verified with SSN 123-45-6789 on file.".to_vec()),
            &ExtraMetadata::for_patient("P100", "FY 2025"),
        )
        .await;
    assert!(outcome.success, "{:?}", outcome.error);

    let placeholder = Regex::new(r"\[REDACTED-US_SSN\]")?;
    let ssn = Regex::new(r"\d{3}-\d{2}-\d{4}")?;
    let stored = index.query("intake insurance verified", 10, None).await?;
    assert!(!stored.is_empty());
    for chunk in stored {
        assert!(placeholder.is_match(&chunk.text));
        assert!(!ssn.is_match(&chunk.text));
    }
    Ok(())
}

#[tokio::test]
async fn unrelated_query_produces_no_documents_report() -> Result<(), Box<dyn std::error::Error>> {
    let index = Arc::new(LocalVectorIndex::in_memory("e2e"));
    let pipeline = pipeline(index.clone(), None)?;
    let outcome = pipeline
        .ingest_document(
            Path::new("progress_note_2025-01-05.txt"),
            Some(b"Blood pressure trending down after medication adjustment.".to_vec()),
            &ExtraMetadata::default(),
        )
        .await;
    assert!(outcome.success);

    let report = generator(index, 0.99)
        .generate_report(
            "quarterly parking garage invoice",
            ReportType::FullSummary,
            None,
            None,
        )
        .await?;

    assert_eq!(report.context_used, 0);
    assert!(report.content.contains("no documents found"));
    assert_eq!(report.metadata.mode, GenerationMode::NoContext);
    Ok(())
}

#[tokio::test]
async fn structured_report_orders_admission_before_progress(
) -> Result<(), Box<dyn std::error::Error>> {
    let index = Arc::new(LocalVectorIndex::in_memory("e2e"));
    let pipeline = pipeline(index.clone(), None)?;
    for (name, text) in [
        (
            "progress_note_2025-01-05.txt",
            "Progress note: sleep improved, mood brighter, appetite returning.",
        ),
        (
            "admission_summary.txt",
            "Admitted with low mood and poor sleep. Started sertraline.",
        ),
    ] {
        let outcome = pipeline
            .ingest_document(
                Path::new(name),
                Some(text.as_bytes().to_vec()),
                &ExtraMetadata::for_patient("P200", "FY 2025"),
            )
            .await;
        assert!(outcome.success);
    }

    let report = generator(index, 0.0)
        .generate_patient_summary("P200", ReportType::ProgressSummary, None)
        .await?;

    assert_eq!(report.metadata.mode, GenerationMode::Structured);
    assert_eq!(report.context_used, 2);
    let admission = report
        .content
        .find("### Admission Information")
        .ok_or("missing admission section")?;
    let progress = report
        .content
        .find("### Progress Notes")
        .ok_or("missing progress section")?;
    assert!(admission < progress);
    assert_eq!(report.sources.len(), 2);
    Ok(())
}
