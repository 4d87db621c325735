use crate::error::RetrievalError;
use crate::generation::GenerationConfig;
use crate::models::{
    GeneratedReport, GenerationMode, RagContext, ReportMetadata, ReportType, RetrievalResult,
};
use crate::retriever::ClinicalRetriever;
use crate::traits::{GenerationBackend, GenerationRequest};
use std::sync::Arc;
use tracing::{info, warn};

pub const PATIENT_SUMMARY_QUERY: &str =
    "clinical summary patient history treatment progress assessment";

pub const NO_CONTEXT_MESSAGE: &str =
    "Unable to generate report: no documents found for this request.";

const STRUCTURED_DISCLAIMER: &str = "\n### Note\n\n*This report shows the retrieved clinical \
    documentation as unsynthesized raw content, grouped by document type. Connect a generation \
    backend to have it written up as a clinical narrative.*\n";

/// Where a report request ends up, decided before any backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    NoContext,
    ContextNoBackend,
    ContextWithBackend,
}

/// Document buckets of the structured report, in section order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocumentCategory {
    Admission,
    Treatment,
    Progress,
    Discharge,
    Other,
}

impl DocumentCategory {
    const KEYWORDS: [(&'static str, DocumentCategory); 4] = [
        ("admission", DocumentCategory::Admission),
        ("treatment", DocumentCategory::Treatment),
        ("progress", DocumentCategory::Progress),
        ("discharge", DocumentCategory::Discharge),
    ];

    /// First keyword found in the lower-cased source name wins.
    pub fn classify(source: &str) -> Self {
        let lowered = source.to_lowercase();
        Self::KEYWORDS
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
            .map(|(_, category)| *category)
            .unwrap_or(Self::Other)
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Self::Admission => "Admission Information",
            Self::Treatment => "Treatment Plan",
            Self::Progress => "Progress Notes",
            Self::Discharge => "Discharge Information",
            Self::Other => "Additional Documentation",
        }
    }
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn system_prompt(report_type: ReportType) -> &'static str {
        match report_type {
            ReportType::FullSummary => concat!(
                "You are a clinical documentation specialist creating comprehensive patient summaries.\n",
                "Generate a detailed clinical summary that includes:\n",
                "- Patient presentation and chief complaint\n",
                "- Relevant history\n",
                "- Assessment findings (organized chronologically by date when available)\n",
                "- Treatment plan and interventions (medications with dosages, therapy, group participation)\n",
                "- Progress and outcomes\n",
                "- Recommendations for continued care\n\n",
                "Use professional clinical language. Only include information explicitly stated in the provided documentation.\n",
                "Organize information clearly with headers and bullet points where appropriate."
            ),
            ReportType::ProgressSummary => concat!(
                "You are a clinical documentation specialist summarizing patient progress.\n",
                "Create a comprehensive progress summary including:\n",
                "- Overall treatment trajectory\n",
                "- Symptom changes over time (organized by date)\n",
                "- Response to treatment interventions\n",
                "- Current clinical status\n",
                "- Areas of improvement and ongoing concerns\n\n",
                "Present information in chronological order using clinical language."
            ),
            ReportType::MedicationReview => concat!(
                "You are a clinical pharmacist reviewing patient medications.\n",
                "Create a detailed medication review including:\n",
                "- Current medications (name, dosage, frequency, route)\n",
                "- Medication changes during treatment\n",
                "- Therapeutic effectiveness\n",
                "- Side effects or adverse reactions\n",
                "- Adherence/compliance notes\n",
                "- Recommendations\n\n",
                "Only include medications explicitly documented in the records."
            ),
            ReportType::DischargeSummary => concat!(
                "You are a clinical documentation specialist creating a discharge summary.\n",
                "Include:\n",
                "- Reason for admission\n",
                "- Hospital course (day-by-day if available)\n",
                "- Condition at discharge\n",
                "- Discharge medications with dosages\n",
                "- Follow-up appointments and instructions\n",
                "- Safety plan and crisis resources\n",
                "- Recommendations for outpatient care\n\n",
                "Use professional clinical language."
            ),
            ReportType::AssessmentSummary => concat!(
                "You are a clinical documentation specialist creating an assessment summary.\n",
                "Include:\n",
                "- Mental status examination findings\n",
                "- Diagnostic impressions\n",
                "- Risk assessment (safety, harm to self/others)\n",
                "- Functional status\n",
                "- Treatment recommendations\n",
                "- Limitations and areas requiring further assessment\n\n",
                "Note any limitations in the available documentation."
            ),
        }
    }

    pub fn user_prompt(
        report_type: ReportType,
        context: &RagContext,
        custom_instruction: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "Based on the following clinical documentation, generate a comprehensive {}:\n\n{}\n\n\
             Provide a thorough and well-organized summary. Include specific dates, dosages, \
             and clinical details where available.",
            report_type.display_name(),
            context.context_text
        );
        let instruction = custom_instruction
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(instruction) = instruction {
            prompt.push_str("\n\nAdditional instruction: ");
            prompt.push_str(instruction);
        }
        prompt
    }
}

/// Groups chunks by document category and renders them verbatim. Progress
/// notes are ordered by source name, which carries the note date.
pub fn structured_report(context: &RagContext, report_type: ReportType) -> String {
    let mut buckets: Vec<(DocumentCategory, Vec<&RetrievalResult>)> = Vec::new();
    for chunk in &context.retrieved_chunks {
        let category = DocumentCategory::classify(chunk.source());
        match buckets.iter_mut().find(|(existing, _)| *existing == category) {
            Some((_, chunks)) => chunks.push(chunk),
            None => buckets.push((category, vec![chunk])),
        }
    }
    buckets.sort_by_key(|(category, _)| *category);

    let mut parts = vec![format!("## {}\n", report_type.display_name())];
    for (category, mut chunks) in buckets {
        if category == DocumentCategory::Progress {
            chunks.sort_by(|a, b| a.source().cmp(b.source()));
        }
        parts.push(format!("### {}\n", category.heading()));
        for chunk in chunks {
            parts.push(format!("**From: {}**\n", chunk.source()));
            parts.push(format!("{}\n", chunk.text));
            parts.push("---\n".to_string());
        }
    }
    parts.push(STRUCTURED_DISCLAIMER.to_string());
    parts.join("\n")
}

pub struct ReportGenerator {
    retriever: ClinicalRetriever,
    backend: Option<Arc<dyn GenerationBackend>>,
    config: GenerationConfig,
}

impl ReportGenerator {
    pub fn new(
        retriever: ClinicalRetriever,
        backend: Option<Arc<dyn GenerationBackend>>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            retriever,
            backend,
            config,
        }
    }

    pub fn retriever(&self) -> &ClinicalRetriever {
        &self.retriever
    }

    pub fn state_for(&self, context: &RagContext) -> ReportState {
        if context.retrieved_chunks.is_empty() {
            ReportState::NoContext
        } else if self.backend.is_none() {
            ReportState::ContextNoBackend
        } else {
            ReportState::ContextWithBackend
        }
    }

    /// Retrieval failures propagate; backend failures degrade to the
    /// structured report.
    pub async fn generate_report(
        &self,
        query: &str,
        report_type: ReportType,
        patient_id: Option<&str>,
        custom_instruction: Option<&str>,
    ) -> Result<GeneratedReport, RetrievalError> {
        info!(report_type = %report_type, "generating report");

        let results = match patient_id {
            Some(patient_id) => {
                self.retriever
                    .retrieve_for_patient(query, patient_id, None)
                    .await?
            }
            None => self.retriever.retrieve(query, None, None).await?,
        };
        let context = self.retriever.build_context(query, results, None);

        Ok(self
            .render(query, report_type, &context, custom_instruction)
            .await)
    }

    pub async fn generate_patient_summary(
        &self,
        patient_id: &str,
        report_type: ReportType,
        custom_instruction: Option<&str>,
    ) -> Result<GeneratedReport, RetrievalError> {
        self.generate_report(
            PATIENT_SUMMARY_QUERY,
            report_type,
            Some(patient_id),
            custom_instruction,
        )
        .await
    }

    /// Produces a report from an already assembled context.
    pub async fn render(
        &self,
        query: &str,
        report_type: ReportType,
        context: &RagContext,
        custom_instruction: Option<&str>,
    ) -> GeneratedReport {
        let (content, mode) = match (self.state_for(context), &self.backend) {
            (ReportState::NoContext, _) => {
                warn!("no relevant documents retrieved");
                (NO_CONTEXT_MESSAGE.to_string(), GenerationMode::NoContext)
            }
            (ReportState::ContextWithBackend, Some(backend)) => {
                let request = GenerationRequest {
                    system_prompt: PromptBuilder::system_prompt(report_type).to_string(),
                    user_prompt: PromptBuilder::user_prompt(
                        report_type,
                        context,
                        custom_instruction,
                    ),
                    max_tokens: self.config.max_tokens,
                    temperature: self.config.temperature,
                    timeout: self.config.timeout(),
                };
                match backend.generate(&request).await {
                    Ok(content) => (content, GenerationMode::Llm),
                    Err(error) => {
                        warn!(error = %error, "generation failed, using structured report");
                        (
                            structured_report(context, report_type),
                            GenerationMode::Structured,
                        )
                    }
                }
            }
            _ => (
                structured_report(context, report_type),
                GenerationMode::Structured,
            ),
        };

        let context_used = match mode {
            GenerationMode::NoContext => 0,
            _ => context.retrieved_chunks.len(),
        };

        GeneratedReport {
            report_type,
            content,
            context_used,
            sources: context.sources.clone(),
            metadata: ReportMetadata {
                total_retrieved: context.total_chunks,
                chars_used: context.chars_used,
                query: query.to_string(),
                mode,
            },
        }
    }
}
