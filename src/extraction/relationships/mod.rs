
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::extraction::Entity;
use crate::llm::{CompletionRequest, LanguageModel, parse_model_json};

/// The closed taxonomy of relationship kinds between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Offers,
    HasFeature,
    HasBenefit,
    PricedAt,
    Endorses,
    WorksFor,
    PartOf,
    IntegratesWith,
    UsedFor,
    Mentions,
    RelatedTo,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 11] = [
        RelationshipType::Offers,
        RelationshipType::HasFeature,
        RelationshipType::HasBenefit,
        RelationshipType::PricedAt,
        RelationshipType::Endorses,
        RelationshipType::WorksFor,
        RelationshipType::PartOf,
        RelationshipType::IntegratesWith,
        RelationshipType::UsedFor,
        RelationshipType::Mentions,
        RelationshipType::RelatedTo,
    ];

    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            RelationshipType::Offers => "offers",
            RelationshipType::HasFeature => "has_feature",
            RelationshipType::HasBenefit => "has_benefit",
            RelationshipType::PricedAt => "priced_at",
            RelationshipType::Endorses => "endorses",
            RelationshipType::WorksFor => "works_for",
            RelationshipType::PartOf => "part_of",
            RelationshipType::IntegratesWith => "integrates_with",
            RelationshipType::UsedFor => "used_for",
            RelationshipType::Mentions => "mentions",
            RelationshipType::RelatedTo => "related_to",
        }
    }

    #[inline]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.label() == label.trim().to_lowercase())
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A directed, typed edge between two extracted entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: RelationshipType,
    pub confidence: f32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRelationshipCandidate {
    #[serde(rename = "type")]
    relationship_type: String,
    source: String,
    target: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RelationshipEnvelope {
    #[serde(default)]
    relationships: Vec<RawRelationshipCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipOptions {
    pub min_confidence: f32,
    pub max_tokens: u32,
}

impl Default for RelationshipOptions {
    #[inline]
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_tokens: 2000,
        }
    }
}

/// Result of a relationship extraction run. `dropped` counts candidates
/// discarded for referencing entity ids outside the supplied set.
#[derive(Debug, Clone, Default)]
pub struct RelationshipReport {
    pub relationships: Vec<EntityRelationship>,
    pub dropped: usize,
    pub tokens_used: u64,
    pub processing_time: Duration,
}

/// Extracts typed relationships among already-extracted entities.
pub struct RelationshipExtractor {
    model: Arc<dyn LanguageModel>,
    options: RelationshipOptions,
}

impl RelationshipExtractor {
    #[inline]
    pub fn new(model: Arc<dyn LanguageModel>, options: RelationshipOptions) -> Self {
        Self { model, options }
    }

    fn system_prompt() -> String {
        let types = RelationshipType::ALL
            .into_iter()
            .map(RelationshipType::label)
            .join(", ");
        format!(
            "You identify relationships between the entities listed by the user. \
             Respond with one JSON object of the form {{\"relationships\": \
             [{{\"type\": ..., \"source\": \"<entity id>\", \"target\": \
             \"<entity id>\", \"confidence\": 0.0-1.0}}]}}. Only use these \
             relationship types: {}. Only reference the listed entity ids.",
            types
        )
    }

    fn entity_listing(entities: &[Entity]) -> String {
        entities
            .iter()
            .map(|e| {
                let description = e.description.as_deref().unwrap_or("");
                format!("- id={} type={} name={} {}", e.id, e.entity_type(), e.name, description)
            })
            .join("\n")
    }

    /// Extract relationships among the supplied entities.
    ///
    /// Fewer than two entities short-circuits without a model call. Candidates
    /// below the confidence threshold or with an unknown type are skipped;
    /// candidates referencing ids outside the entity set are dropped and
    /// counted in the report.
    pub async fn extract_relationships(&self, entities: &[Entity]) -> RelationshipReport {
        let started = Instant::now();

        if entities.len() < 2 {
            debug!("Skipping relationship extraction for {} entities", entities.len());
            return RelationshipReport {
                processing_time: started.elapsed(),
                ..RelationshipReport::default()
            };
        }

        let request = CompletionRequest {
            system_prompt: Self::system_prompt(),
            user_prompt: Self::entity_listing(entities),
            max_tokens: self.options.max_tokens,
        };

        let response = match self.model.complete_json(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Relationship extraction call failed: {}", e);
                return RelationshipReport {
                    processing_time: started.elapsed(),
                    ..RelationshipReport::default()
                };
            }
        };

        let envelope: RelationshipEnvelope = match parse_model_json(&response.content) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Relationship extraction response unparseable: {}", e);
                return RelationshipReport {
                    tokens_used: response.tokens_used,
                    processing_time: started.elapsed(),
                    ..RelationshipReport::default()
                };
            }
        };

        let known_ids: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        let mut relationships = Vec::new();
        let mut dropped = 0;

        for candidate in envelope.relationships {
            if candidate.confidence < self.options.min_confidence {
                debug!(
                    "Dropping relationship candidate below confidence threshold ({:.2} < {:.2})",
                    candidate.confidence, self.options.min_confidence
                );
                continue;
            }
            let Some(relationship_type) = RelationshipType::from_label(&candidate.relationship_type)
            else {
                warn!(
                    "Skipping relationship candidate with unknown type '{}'",
                    candidate.relationship_type
                );
                continue;
            };
            if !known_ids.contains(candidate.source.as_str())
                || !known_ids.contains(candidate.target.as_str())
            {
                dropped += 1;
                continue;
            }

            relationships.push(EntityRelationship {
                id: Uuid::new_v4().to_string(),
                source_entity_id: candidate.source,
                target_entity_id: candidate.target,
                relationship_type,
                confidence: candidate.confidence,
                metadata: candidate.metadata,
            });
        }

        if dropped > 0 {
            warn!("Dropped {} relationship candidates with dangling endpoints", dropped);
        }

        RelationshipReport {
            relationships,
            dropped,
            tokens_used: response.tokens_used,
            processing_time: started.elapsed(),
        }
    }
}
