use crate::config::RedactionSettings;
use crate::error::{http_cause, RedactionError};
use crate::traits::EntityRecognizer;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_REPLACEMENT: &str = "[REDACTED-{entity_type}]";
pub const HEALTHCARE_REPLACEMENT: &str = "[PHI-{entity_type}]";
const ENTITY_PLACEHOLDER: &str = "{entity_type}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    UsSsn,
    PhoneNumber,
    EmailAddress,
    DateTime,
    Location,
    CreditCard,
    UsDriverLicense,
    UsPassport,
    IpAddress,
    Url,
    MedicalLicense,
}

impl EntityType {
    pub const ALL: [EntityType; 12] = [
        EntityType::Person,
        EntityType::UsSsn,
        EntityType::PhoneNumber,
        EntityType::EmailAddress,
        EntityType::DateTime,
        EntityType::Location,
        EntityType::CreditCard,
        EntityType::UsDriverLicense,
        EntityType::UsPassport,
        EntityType::IpAddress,
        EntityType::Url,
        EntityType::MedicalLicense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::UsSsn => "US_SSN",
            Self::PhoneNumber => "PHONE_NUMBER",
            Self::EmailAddress => "EMAIL_ADDRESS",
            Self::DateTime => "DATE_TIME",
            Self::Location => "LOCATION",
            Self::CreditCard => "CREDIT_CARD",
            Self::UsDriverLicense => "US_DRIVER_LICENSE",
            Self::UsPassport => "US_PASSPORT",
            Self::IpAddress => "IP_ADDRESS",
            Self::Url => "URL",
            Self::MedicalLicense => "MEDICAL_LICENSE",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == label)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected entity. `span` is a byte range into the analysed text.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedEntity {
    pub entity_type: EntityType,
    pub span: Range<usize>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrubberProfile {
    #[default]
    Default,
    Healthcare,
}

impl ScrubberProfile {
    pub fn entities(&self) -> Vec<EntityType> {
        match self {
            Self::Default => vec![
                EntityType::Person,
                EntityType::UsSsn,
                EntityType::PhoneNumber,
                EntityType::EmailAddress,
                EntityType::CreditCard,
                EntityType::UsDriverLicense,
                EntityType::UsPassport,
                EntityType::DateTime,
                EntityType::Location,
            ],
            Self::Healthcare => vec![
                EntityType::Person,
                EntityType::UsSsn,
                EntityType::PhoneNumber,
                EntityType::EmailAddress,
                EntityType::DateTime,
                EntityType::Location,
                EntityType::CreditCard,
                EntityType::UsDriverLicense,
                EntityType::UsPassport,
                EntityType::IpAddress,
                EntityType::Url,
            ],
        }
    }

    pub fn replacement_format(&self) -> &'static str {
        match self {
            Self::Default => DEFAULT_REPLACEMENT,
            Self::Healthcare => HEALTHCARE_REPLACEMENT,
        }
    }
}

struct PatternRule {
    entity_type: EntityType,
    pattern: Regex,
    /// Capture group holding the entity; 0 is the whole match.
    group: usize,
    confidence: f32,
    validate: fn(&str) -> bool,
}

/// Local regex recognizers. Entity types without a rule here (locations,
/// licence and passport numbers) are only detected by an analyzer service.
pub struct PatternRecognizer {
    rules: Vec<PatternRule>,
    score_threshold: f32,
}

impl PatternRecognizer {
    pub fn new(entities: &[EntityType], score_threshold: f32) -> Result<Self, RedactionError> {
        let mut rules = Vec::new();
        for entity_type in entities {
            rules.extend(rules_for(*entity_type)?);
        }
        debug!(
            requested = entities.len(),
            rules = rules.len(),
            "pattern recognizer ready"
        );
        Ok(Self {
            rules,
            score_threshold,
        })
    }

    fn detect(&self, text: &str) -> Vec<RecognizedEntity> {
        let mut found = Vec::new();
        for rule in &self.rules {
            if rule.confidence < self.score_threshold {
                continue;
            }
            for captures in rule.pattern.captures_iter(text) {
                let Some(matched) = captures.get(rule.group) else {
                    continue;
                };
                let value = matched
                    .as_str()
                    .trim_end_matches(['.', ',', ';', ':', ')', '!', '?']);
                if value.is_empty() || !(rule.validate)(value) {
                    continue;
                }
                found.push(RecognizedEntity {
                    entity_type: rule.entity_type,
                    span: matched.start()..matched.start() + value.len(),
                    confidence: rule.confidence,
                });
            }
        }
        found.sort_by_key(|entity| (entity.span.start, Reverse(entity.span.end)));
        found
    }
}

#[async_trait]
impl EntityRecognizer for PatternRecognizer {
    async fn analyze(&self, text: &str) -> Result<Vec<RecognizedEntity>, RedactionError> {
        Ok(self.detect(text))
    }
}

fn rules_for(entity_type: EntityType) -> Result<Vec<PatternRule>, RedactionError> {
    let rule = |pattern: &str, group: usize, confidence: f32, validate: fn(&str) -> bool| {
        Ok::<_, RedactionError>(PatternRule {
            entity_type,
            pattern: Regex::new(pattern)?,
            group,
            confidence,
            validate,
        })
    };

    let rules = match entity_type {
        EntityType::UsSsn => vec![rule(r"\b\d{3}-\d{2}-\d{4}\b", 0, 0.85, valid_ssn)?],
        EntityType::PhoneNumber => vec![rule(
            r"(?:\+1[\s.-]?)?(?:\(\d{3}\)\s?|\b\d{3}[\s.-])\d{3}[\s.-]\d{4}\b",
            0,
            0.75,
            always,
        )?],
        EntityType::EmailAddress => vec![rule(
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            0,
            0.9,
            always,
        )?],
        EntityType::CreditCard => vec![rule(r"\b(?:\d[ -]?){12,18}\d\b", 0, 0.9, luhn_valid)?],
        EntityType::IpAddress => vec![rule(
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            0,
            0.6,
            always,
        )?],
        EntityType::Url => vec![rule(r#"\bhttps?://[^\s<>"']+"#, 0, 0.6, always)?],
        EntityType::DateTime => vec![rule(
            r"\b(?:\d{1,2}[/-]\d{1,2}[/-](?:\d{4}|\d{2})|\d{4}-\d{2}-\d{2})\b",
            0,
            0.6,
            always,
        )?],
        EntityType::Person => vec![
            rule(
                r"\b(?:Dr|Mr|Mrs|Ms|Miss)\.?[ \t]+([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)?)",
                1,
                0.7,
                always,
            )?,
            rule(
                r"(?m)\b(?:Patient Name|Patient|Name)[ \t]*:[ \t]*([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+){0,2})",
                1,
                0.7,
                always,
            )?,
        ],
        EntityType::Location
        | EntityType::UsDriverLicense
        | EntityType::UsPassport
        | EntityType::MedicalLicense => Vec::new(),
    };
    Ok(rules)
}

fn always(_: &str) -> bool {
    true
}

fn valid_ssn(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 3
        && groups.iter().all(|group| group.chars().any(|digit| digit != '0'))
        && groups[0] != "666"
        && !groups[0].starts_with('9')
}

fn luhn_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(position, &digit)| {
            if position % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    language: &'a str,
    entities: Vec<&'static str>,
    score_threshold: f32,
}

#[derive(Debug, Deserialize)]
struct AnalyzeHit {
    entity_type: String,
    start: usize,
    end: usize,
    score: f32,
}

/// Client for a Presidio analyzer service.
pub struct PresidioAnalyzer {
    endpoint: Url,
    client: Client,
    entities: Vec<EntityType>,
    language: String,
    score_threshold: f32,
}

impl PresidioAnalyzer {
    pub fn new(
        base_url: &str,
        entities: Vec<EntityType>,
        score_threshold: f32,
        timeout: Duration,
    ) -> Result<Self, RedactionError> {
        let endpoint = Url::parse(base_url)?.join("analyze")?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RedactionError::Request(http_cause(&error)))?;
        Ok(Self {
            endpoint,
            client,
            entities,
            language: "en".to_string(),
            score_threshold,
        })
    }
}

#[async_trait]
impl EntityRecognizer for PresidioAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Vec<RecognizedEntity>, RedactionError> {
        let request = AnalyzeRequest {
            text,
            language: &self.language,
            entities: self.entities.iter().map(EntityType::as_str).collect(),
            score_threshold: self.score_threshold,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|error| RedactionError::Request(http_cause(&error)))?;

        if !response.status().is_success() {
            return Err(RedactionError::Status(response.status().as_u16()));
        }

        let hits: Vec<AnalyzeHit> = response
            .json()
            .await
            .map_err(|_| RedactionError::MalformedResponse)?;

        // The analyzer reports code-point offsets.
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
        byte_offsets.push(text.len());

        let mut entities = Vec::with_capacity(hits.len());
        let mut unknown = 0usize;
        for hit in hits {
            let Some(entity_type) = EntityType::from_label(&hit.entity_type) else {
                unknown += 1;
                continue;
            };
            let (Some(&start), Some(&end)) =
                (byte_offsets.get(hit.start), byte_offsets.get(hit.end))
            else {
                return Err(RedactionError::SpanOutOfBounds {
                    start: hit.start,
                    end: hit.end,
                });
            };
            entities.push(RecognizedEntity {
                entity_type,
                span: start..end,
                confidence: hit.score,
            });
        }

        if unknown > 0 {
            debug!(unknown, "analyzer returned unrequested entity types");
        }
        Ok(entities)
    }
}

/// Replaces entity spans with a typed placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redactor {
    replacement_format: String,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(DEFAULT_REPLACEMENT)
    }
}

impl Redactor {
    pub fn new(replacement_format: impl Into<String>) -> Self {
        Self {
            replacement_format: replacement_format.into(),
        }
    }

    pub fn placeholder(&self, entity_type: EntityType) -> String {
        self.replacement_format
            .replace(ENTITY_PLACEHOLDER, entity_type.as_str())
    }

    /// Text outside the entity spans is copied unchanged. Overlapping spans
    /// are merged left to right and take the type of the earliest (longest)
    /// detection.
    pub fn redact(
        &self,
        text: &str,
        entities: &[RecognizedEntity],
    ) -> Result<String, RedactionError> {
        for entity in entities {
            let Range { start, end } = entity.span;
            if start > end
                || end > text.len()
                || !text.is_char_boundary(start)
                || !text.is_char_boundary(end)
            {
                return Err(RedactionError::SpanOutOfBounds { start, end });
            }
        }

        let mut ordered: Vec<&RecognizedEntity> =
            entities.iter().filter(|entity| !entity.span.is_empty()).collect();
        ordered.sort_by_key(|entity| (entity.span.start, Reverse(entity.span.end)));

        let mut merged: Vec<(Range<usize>, EntityType)> = Vec::new();
        for entity in ordered {
            match merged.last_mut() {
                Some((span, _)) if entity.span.start < span.end => {
                    span.end = span.end.max(entity.span.end);
                }
                _ => merged.push((entity.span.clone(), entity.entity_type)),
            }
        }

        let mut redacted = String::with_capacity(text.len());
        let mut cursor = 0;
        for (span, entity_type) in merged {
            redacted.push_str(&text[cursor..span.start]);
            redacted.push_str(&self.placeholder(entity_type));
            cursor = span.end;
        }
        redacted.push_str(&text[cursor..]);
        Ok(redacted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrubResult {
    pub original_length: usize,
    pub scrubbed_length: usize,
    pub entities_found: usize,
    pub entity_types: BTreeMap<EntityType, usize>,
    pub scrubbed_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityStats {
    pub count: usize,
    pub avg_confidence: f32,
    pub min_confidence: f32,
    pub max_confidence: f32,
}

/// Audit summary of detections. Carries no detected values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub total_entities: usize,
    pub unique_types: usize,
    pub entity_breakdown: BTreeMap<EntityType, EntityStats>,
    pub text_length: usize,
}

/// Detection plus redaction. Logs counts and entity types only.
#[derive(Clone)]
pub struct PiiScrubber {
    recognizer: Arc<dyn EntityRecognizer>,
    redactor: Redactor,
}

impl PiiScrubber {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>, redactor: Redactor) -> Self {
        Self {
            recognizer,
            redactor,
        }
    }

    /// Pattern-based scrubber for a profile, needing no external service.
    pub fn local(profile: ScrubberProfile, score_threshold: f32) -> Result<Self, RedactionError> {
        let recognizer = PatternRecognizer::new(&profile.entities(), score_threshold)?;
        Ok(Self::new(
            Arc::new(recognizer),
            Redactor::new(profile.replacement_format()),
        ))
    }

    /// `None` when redaction is disabled. A configured analyzer URL selects
    /// the Presidio client, otherwise the local patterns are used.
    pub fn from_settings(settings: &RedactionSettings) -> Result<Option<Self>, RedactionError> {
        if !settings.enabled {
            return Ok(None);
        }
        let profile = settings.profile;
        let scrubber = match &settings.presidio_url {
            Some(url) => Self::new(
                Arc::new(PresidioAnalyzer::new(
                    url,
                    profile.entities(),
                    settings.score_threshold,
                    Duration::from_secs(settings.timeout_secs),
                )?),
                Redactor::new(profile.replacement_format()),
            ),
            None => Self::local(profile, settings.score_threshold)?,
        };
        Ok(Some(scrubber))
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub async fn analyze(&self, text: &str) -> Result<Vec<RecognizedEntity>, RedactionError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let entities = self.recognizer.analyze(text).await?;
        debug!(entities = entities.len(), "analysis complete");
        Ok(entities)
    }

    pub async fn scrub(&self, text: &str) -> Result<ScrubResult, RedactionError> {
        if text.trim().is_empty() {
            return Ok(ScrubResult {
                original_length: 0,
                scrubbed_length: 0,
                entities_found: 0,
                entity_types: BTreeMap::new(),
                scrubbed_text: String::new(),
            });
        }

        let original_length = text.chars().count();
        let entities = self.analyze(text).await?;
        let scrubbed_text = self.redactor.redact(text, &entities)?;

        let mut entity_types = BTreeMap::new();
        for entity in &entities {
            *entity_types.entry(entity.entity_type).or_insert(0) += 1;
        }

        if !entities.is_empty() {
            let labels: Vec<&str> = entity_types.keys().map(EntityType::as_str).collect();
            debug!(
                redacted = entities.len(),
                types = ?labels,
                "scrubbing complete"
            );
        }

        Ok(ScrubResult {
            original_length,
            scrubbed_length: scrubbed_text.chars().count(),
            entities_found: entities.len(),
            entity_types,
            scrubbed_text,
        })
    }

    /// Results are in input order. The first failure aborts the batch.
    pub async fn scrub_batch(&self, texts: &[String]) -> Result<Vec<ScrubResult>, RedactionError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.scrub(text).await?);
        }
        let total: usize = results.iter().map(|result| result.entities_found).sum();
        info!(texts = texts.len(), entities = total, "batch scrubbing complete");
        Ok(results)
    }

    pub async fn entity_report(&self, text: &str) -> Result<EntityReport, RedactionError> {
        let entities = self.analyze(text).await?;

        let mut scores: BTreeMap<EntityType, Vec<f32>> = BTreeMap::new();
        for entity in &entities {
            scores
                .entry(entity.entity_type)
                .or_default()
                .push(entity.confidence);
        }

        let entity_breakdown = scores
            .into_iter()
            .map(|(entity_type, values)| {
                let count = values.len();
                let stats = EntityStats {
                    count,
                    avg_confidence: values.iter().sum::<f32>() / count as f32,
                    min_confidence: values.iter().copied().fold(1.0, f32::min),
                    max_confidence: values.iter().copied().fold(0.0, f32::max),
                };
                (entity_type, stats)
            })
            .collect::<BTreeMap<_, _>>();

        Ok(EntityReport {
            total_entities: entities.len(),
            unique_types: entity_breakdown.len(),
            entity_breakdown,
            text_length: text.chars().count(),
        })
    }
}
