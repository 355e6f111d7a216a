pub mod relationships;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunking::TextChunk;
use crate::llm::{CompletionRequest, LanguageModel, parse_model_json};

/// Number of chunks concatenated into one extraction request.
const CHUNK_BATCH_SIZE: usize = 5;

/// The closed taxonomy of entity types recognized by the extractor.
///
/// Candidates whose type falls outside this set are logged and skipped,
/// never turned into entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Service,
    Feature,
    Benefit,
    Pricing,
    Testimonial,
    Company,
    Person,
    Statistic,
    Faq,
    Cta,
    ProcessStep,
    UseCase,
    Integration,
    Contact,
    CompanyName,
    CompanyTagline,
    CompanyDescription,
    MissionStatement,
    SocialLink,
    NavCategory,
    BrandVoice,
}

impl EntityType {
    pub const ALL: [EntityType; 22] = [
        EntityType::Product,
        EntityType::Service,
        EntityType::Feature,
        EntityType::Benefit,
        EntityType::Pricing,
        EntityType::Testimonial,
        EntityType::Company,
        EntityType::Person,
        EntityType::Statistic,
        EntityType::Faq,
        EntityType::Cta,
        EntityType::ProcessStep,
        EntityType::UseCase,
        EntityType::Integration,
        EntityType::Contact,
        EntityType::CompanyName,
        EntityType::CompanyTagline,
        EntityType::CompanyDescription,
        EntityType::MissionStatement,
        EntityType::SocialLink,
        EntityType::NavCategory,
        EntityType::BrandVoice,
    ];

    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Service => "service",
            EntityType::Feature => "feature",
            EntityType::Benefit => "benefit",
            EntityType::Pricing => "pricing",
            EntityType::Testimonial => "testimonial",
            EntityType::Company => "company",
            EntityType::Person => "person",
            EntityType::Statistic => "statistic",
            EntityType::Faq => "faq",
            EntityType::Cta => "cta",
            EntityType::ProcessStep => "process_step",
            EntityType::UseCase => "use_case",
            EntityType::Integration => "integration",
            EntityType::Contact => "contact",
            EntityType::CompanyName => "company_name",
            EntityType::CompanyTagline => "company_tagline",
            EntityType::CompanyDescription => "company_description",
            EntityType::MissionStatement => "mission_statement",
            EntityType::SocialLink => "social_link",
            EntityType::NavCategory => "nav_category",
            EntityType::BrandVoice => "brand_voice",
        }
    }

    /// Parse a raw candidate type string; `None` for anything outside the
    /// taxonomy.
    #[inline]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.label() == label.trim().to_lowercase())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Typed payload of an entity. Variants mirror [`EntityType`]; variants with
/// required fields carry them directly so downstream code never re-parses
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Service,
    Feature,
    Benefit,
    Pricing { amount: String },
    Testimonial { quote: String },
    Company,
    Person,
    Statistic { value: String },
    Faq { question: String, answer: String },
    Cta { action: String },
    ProcessStep { position: Option<u32> },
    UseCase,
    Integration,
    Contact { value: String },
    CompanyName,
    CompanyTagline,
    CompanyDescription,
    MissionStatement,
    SocialLink { url: String },
    NavCategory,
    BrandVoice,
}

impl EntityKind {
    #[inline]
    pub fn entity_type(&self) -> EntityType {
        match *self {
            EntityKind::Product => EntityType::Product,
            EntityKind::Service => EntityType::Service,
            EntityKind::Feature => EntityType::Feature,
            EntityKind::Benefit => EntityType::Benefit,
            EntityKind::Pricing { .. } => EntityType::Pricing,
            EntityKind::Testimonial { .. } => EntityType::Testimonial,
            EntityKind::Company => EntityType::Company,
            EntityKind::Person => EntityType::Person,
            EntityKind::Statistic { .. } => EntityType::Statistic,
            EntityKind::Faq { .. } => EntityType::Faq,
            EntityKind::Cta { .. } => EntityType::Cta,
            EntityKind::ProcessStep { .. } => EntityType::ProcessStep,
            EntityKind::UseCase => EntityType::UseCase,
            EntityKind::Integration => EntityType::Integration,
            EntityKind::Contact { .. } => EntityType::Contact,
            EntityKind::CompanyName => EntityType::CompanyName,
            EntityKind::CompanyTagline => EntityType::CompanyTagline,
            EntityKind::CompanyDescription => EntityType::CompanyDescription,
            EntityKind::MissionStatement => EntityType::MissionStatement,
            EntityKind::SocialLink { .. } => EntityType::SocialLink,
            EntityKind::NavCategory => EntityType::NavCategory,
            EntityKind::BrandVoice => EntityType::BrandVoice,
        }
    }
}

/// A deduplicated, typed entity extracted from document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub confidence: f32,
    /// Chunks this entity was observed in; a set so dedup unions cleanly.
    pub source_chunk_ids: BTreeSet<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub kind: EntityKind,
}

impl Entity {
    #[inline]
    pub fn new(name: String, confidence: f32, kind: EntityKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description: None,
            confidence,
            source_chunk_ids: BTreeSet::new(),
            metadata: serde_json::Map::new(),
            kind,
        }
    }

    #[inline]
    pub fn entity_type(&self) -> EntityType {
        self.kind.entity_type()
    }

    /// Identity key for deduplication: type plus case-folded trimmed name.
    #[inline]
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.entity_type(), self.name.trim().to_lowercase())
    }
}

/// One candidate as produced by the language model, prior to validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntityCandidate {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    /// Type-specific fields (faq question/answer, pricing amount, ...).
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Top-level shape of the model's extraction response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionEnvelope {
    #[serde(default)]
    pub entities: Vec<RawEntityCandidate>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub primary_topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Candidates below this confidence are dropped.
    pub min_confidence: f32,
    /// Hard cap on entities kept per extraction call.
    pub max_entities: usize,
    pub max_tokens: u32,
}

impl Default for ExtractionOptions {
    #[inline]
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_entities: 100,
            max_tokens: 4000,
        }
    }
}

/// Result of an extraction run. Model and parse failures degrade to an empty
/// report rather than an error, so one bad batch never sinks a document.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub entities: Vec<Entity>,
    pub summary: Option<String>,
    pub document_type: Option<String>,
    pub primary_topic: Option<String>,
    pub tokens_used: u64,
    pub processing_time: Duration,
}

/// Extracts typed entities from content through a language model and
/// validates candidates against the closed taxonomy.
pub struct EntityExtractor {
    model: Arc<dyn LanguageModel>,
    options: ExtractionOptions,
}

impl EntityExtractor {
    #[inline]
    pub fn new(model: Arc<dyn LanguageModel>, options: ExtractionOptions) -> Self {
        Self { model, options }
    }

    #[inline]
    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    fn system_prompt() -> String {
        let types = EntityType::ALL
            .into_iter()
            .map(EntityType::label)
            .join(", ");
        format!(
            "You extract structured entities from business and marketing content. \
             Respond with one JSON object of the form {{\"entities\": [{{\"type\": ..., \
             \"name\": ..., \"description\": ..., \"confidence\": 0.0-1.0, \
             \"fields\": {{...}}}}], \"summary\": ..., \"document_type\": ..., \
             \"primary_topic\": ...}}. Only use these entity types: {}. Put \
             type-specific details (faq question/answer, testimonial quote, pricing \
             amount, statistic value, cta action, social_link url, contact value, \
             process_step position) in \"fields\".",
            types
        )
    }

    /// Extract entities from a block of content, attributing each entity to
    /// the supplied chunk ids.
    pub async fn extract_entities(&self, content: &str, chunk_ids: &[String]) -> ExtractionReport {
        let started = Instant::now();

        if content.trim().is_empty() {
            return ExtractionReport {
                processing_time: started.elapsed(),
                ..ExtractionReport::default()
            };
        }

        let request = CompletionRequest {
            system_prompt: Self::system_prompt(),
            user_prompt: content.to_string(),
            max_tokens: self.options.max_tokens,
        };

        let response = match self.model.complete_json(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Entity extraction call failed: {}", e);
                return ExtractionReport {
                    processing_time: started.elapsed(),
                    ..ExtractionReport::default()
                };
            }
        };

        let envelope: ExtractionEnvelope = match parse_model_json(&response.content) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Entity extraction response unparseable: {}", e);
                return ExtractionReport {
                    tokens_used: response.tokens_used,
                    processing_time: started.elapsed(),
                    ..ExtractionReport::default()
                };
            }
        };

        let mut entities = Vec::new();
        for candidate in envelope.entities {
            if entities.len() >= self.options.max_entities {
                warn!(
                    "Entity cap of {} reached; discarding remaining candidates",
                    self.options.max_entities
                );
                break;
            }
            if candidate.confidence < self.options.min_confidence {
                debug!(
                    "Dropping candidate '{}' below confidence threshold ({:.2} < {:.2})",
                    candidate.name, candidate.confidence, self.options.min_confidence
                );
                continue;
            }
            let Some(entity_type) = EntityType::from_label(&candidate.entity_type) else {
                warn!(
                    "Skipping candidate '{}' with unknown type '{}'",
                    candidate.name, candidate.entity_type
                );
                continue;
            };
            entities.push(build_entity(candidate, entity_type, chunk_ids));
        }

        debug!(
            "Extracted {} entities from {} chars",
            entities.len(),
            content.len()
        );

        ExtractionReport {
            entities,
            summary: envelope.summary,
            document_type: envelope.document_type,
            primary_topic: envelope.primary_topic,
            tokens_used: response.tokens_used,
            processing_time: started.elapsed(),
        }
    }

    /// Extract entities across a document's chunks, batching chunks per model
    /// call and deduplicating across the whole document afterwards.
    pub async fn extract_entities_from_chunks(&self, chunks: &[TextChunk]) -> ExtractionReport {
        let started = Instant::now();
        let mut entities = Vec::new();
        let mut tokens_used = 0;
        let mut summary = None;
        let mut document_type = None;
        let mut primary_topic = None;

        for batch in chunks.chunks(CHUNK_BATCH_SIZE) {
            let content = batch
                .iter()
                .map(|c| format!("[Chunk {}]\n{}", c.id, c.content))
                .join("\n\n");
            let chunk_ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();

            let report = self.extract_entities(&content, &chunk_ids).await;
            entities.extend(report.entities);
            tokens_used += report.tokens_used;
            // First batch wins for document-level fields.
            summary = summary.or(report.summary);
            document_type = document_type.or(report.document_type);
            primary_topic = primary_topic.or(report.primary_topic);
        }

        let entities = deduplicate_entities(entities);

        ExtractionReport {
            entities,
            summary,
            document_type,
            primary_topic,
            tokens_used,
            processing_time: started.elapsed(),
        }
    }
}

fn field_string(
    fields: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    fields
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Construct the typed entity for a validated candidate, defaulting
/// variant-required fields from the candidate's name and description.
fn build_entity(
    candidate: RawEntityCandidate,
    entity_type: EntityType,
    chunk_ids: &[String],
) -> Entity {
    let RawEntityCandidate {
        name,
        description,
        confidence,
        fields,
        ..
    } = candidate;

    let description = description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
    let non_empty_description = description.clone();

    let kind = match entity_type {
        EntityType::Product => EntityKind::Product,
        EntityType::Service => EntityKind::Service,
        EntityType::Feature => EntityKind::Feature,
        EntityType::Benefit => EntityKind::Benefit,
        EntityType::Pricing => EntityKind::Pricing {
            amount: field_string(&fields, "amount").unwrap_or_else(|| name.clone()),
        },
        EntityType::Testimonial => EntityKind::Testimonial {
            quote: field_string(&fields, "quote")
                .or_else(|| non_empty_description.clone())
                .unwrap_or_else(|| name.clone()),
        },
        EntityType::Company => EntityKind::Company,
        EntityType::Person => EntityKind::Person,
        EntityType::Statistic => EntityKind::Statistic {
            value: field_string(&fields, "value").unwrap_or_else(|| name.clone()),
        },
        EntityType::Faq => EntityKind::Faq {
            question: field_string(&fields, "question").unwrap_or_else(|| name.clone()),
            answer: field_string(&fields, "answer")
                .or_else(|| non_empty_description.clone())
                .unwrap_or_default(),
        },
        EntityType::Cta => EntityKind::Cta {
            action: field_string(&fields, "action").unwrap_or_else(|| name.clone()),
        },
        EntityType::ProcessStep => EntityKind::ProcessStep {
            position: fields
                .get("position")
                .and_then(serde_json::Value::as_u64)
                .and_then(|p| u32::try_from(p).ok()),
        },
        EntityType::UseCase => EntityKind::UseCase,
        EntityType::Integration => EntityKind::Integration,
        EntityType::Contact => EntityKind::Contact {
            value: field_string(&fields, "value").unwrap_or_else(|| name.clone()),
        },
        EntityType::CompanyName => EntityKind::CompanyName,
        EntityType::CompanyTagline => EntityKind::CompanyTagline,
        EntityType::CompanyDescription => EntityKind::CompanyDescription,
        EntityType::MissionStatement => EntityKind::MissionStatement,
        EntityType::SocialLink => EntityKind::SocialLink {
            url: field_string(&fields, "url").unwrap_or_else(|| name.clone()),
        },
        EntityType::NavCategory => EntityKind::NavCategory,
        EntityType::BrandVoice => EntityKind::BrandVoice,
    };

    Entity {
        id: Uuid::new_v4().to_string(),
        name,
        description,
        confidence,
        source_chunk_ids: chunk_ids.iter().cloned().collect(),
        metadata: fields,
        kind,
    }
}

/// Collapse entities sharing a dedup key into one.
///
/// Merge policy: maximum confidence, union of source chunk ids, first
/// non-empty description, shallow metadata merge with later keys overriding.
/// First-seen order of distinct keys is preserved and the operation is
/// idempotent.
#[inline]
pub fn deduplicate_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut merged: Vec<Entity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entity in entities {
        let key = entity.dedup_key();
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut merged[i];
                if entity.confidence > existing.confidence {
                    existing.confidence = entity.confidence;
                }
                existing
                    .source_chunk_ids
                    .extend(entity.source_chunk_ids.into_iter());
                if existing.description.as_deref().is_none_or(str::is_empty)
                    && entity.description.as_deref().is_some_and(|d| !d.is_empty())
                {
                    existing.description = entity.description;
                }
                for (k, v) in entity.metadata {
                    existing.metadata.insert(k, v);
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(entity);
            }
        }
    }

    merged
}
