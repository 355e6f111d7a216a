pub mod export;
pub mod query;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extraction::relationships::RelationshipType;
use crate::extraction::{Entity, EntityType};
use crate::store::KnowledgeStore;
use crate::{KbError, Result};

/// One entity rendered as a graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub confidence: f32,
    pub description: Option<String>,
    /// Count of incident edges, computed after edge filtering.
    pub degree: usize,
    /// Degree centrality in [0, 1]; populated by the query engine.
    pub centrality: Option<f32>,
}

impl GraphNode {
    #[inline]
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            entity_type: entity.entity_type(),
            confidence: entity.confidence,
            description: entity.description.clone(),
            degree: 0,
            centrality: None,
        }
    }
}

/// One relationship rendered as a directed graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub relationship_type: RelationshipType,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub workspace_id: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub entity_types: BTreeSet<EntityType>,
    pub relationship_types: BTreeSet<RelationshipType>,
}

/// The node/edge structure formed by a workspace's entities and
/// relationships.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: GraphMetadata,
}

impl KnowledgeGraph {
    /// Recompute node degrees from the current edge set.
    pub fn refresh_degrees(&mut self) {
        let mut degrees: HashMap<&str, usize> = HashMap::new();
        for edge in &self.edges {
            *degrees.entry(edge.source.as_str()).or_insert(0) += 1;
            *degrees.entry(edge.target.as_str()).or_insert(0) += 1;
        }
        let degrees: HashMap<String, usize> = degrees
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for node in &mut self.nodes {
            node.degree = degrees.get(&node.id).copied().unwrap_or(0);
        }
    }

    /// Recompute counts and type sets from the current node/edge collections.
    pub fn refresh_metadata(&mut self) {
        self.metadata.node_count = self.nodes.len();
        self.metadata.edge_count = self.edges.len();
        self.metadata.entity_types = self.nodes.iter().map(|n| n.entity_type).collect();
        self.metadata.relationship_types =
            self.edges.iter().map(|e| e.relationship_type).collect();
    }

    #[inline]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Scope and filters applied while building a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Cap on node count; entities are kept in confidence-descending order.
    pub max_entities: usize,
    pub entity_types: Option<Vec<EntityType>>,
    pub relationship_types: Option<Vec<RelationshipType>>,
    pub min_entity_confidence: Option<f32>,
    pub min_relationship_confidence: Option<f32>,
    /// Restrict to entities observed in this knowledge base item's chunks.
    pub item_id: Option<String>,
}

impl Default for GraphOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_entities: 1000,
            entity_types: None,
            relationship_types: None,
            min_entity_confidence: None,
            min_relationship_confidence: None,
            item_id: None,
        }
    }
}

/// Builds knowledge graphs from stored entities and relationships.
///
/// Filtering order is load-bearing: nodes are selected first, then edges are
/// constrained to the selected node set, then degrees are computed.
pub struct GraphBuilder {
    store: Arc<dyn KnowledgeStore>,
}

impl GraphBuilder {
    #[inline]
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }

    pub async fn build(&self, workspace_id: &str, options: &GraphOptions) -> Result<KnowledgeGraph> {
        let entities = self.store.get_entities(workspace_id).await?;

        let scope_chunk_ids: Option<HashSet<String>> = match &options.item_id {
            Some(item_id) => Some(
                self.store
                    .get_chunks(item_id)
                    .await?
                    .into_iter()
                    .map(|c| c.id)
                    .collect(),
            ),
            None => None,
        };

        let mut selected: Vec<&Entity> = entities
            .iter()
            .filter(|e| {
                options
                    .entity_types
                    .as_ref()
                    .is_none_or(|types| types.contains(&e.entity_type()))
            })
            .filter(|e| {
                options
                    .min_entity_confidence
                    .is_none_or(|min| e.confidence >= min)
            })
            .filter(|e| {
                scope_chunk_ids.as_ref().is_none_or(|scope| {
                    e.source_chunk_ids.iter().any(|id| scope.contains(id))
                })
            })
            .collect();

        selected.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        selected.truncate(options.max_entities);

        let nodes: Vec<GraphNode> = selected.iter().map(|e| GraphNode::from_entity(e)).collect();
        let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

        let relationships = self.store.get_relationships(workspace_id).await?;
        let edges: Vec<GraphEdge> = relationships
            .iter()
            .filter(|r| {
                options
                    .relationship_types
                    .as_ref()
                    .is_none_or(|types| types.contains(&r.relationship_type))
            })
            .filter(|r| {
                options
                    .min_relationship_confidence
                    .is_none_or(|min| r.confidence >= min)
            })
            .filter(|r| {
                node_ids.contains(r.source_entity_id.as_str())
                    && node_ids.contains(r.target_entity_id.as_str())
            })
            .map(|r| GraphEdge {
                id: r.id.clone(),
                source: r.source_entity_id.clone(),
                target: r.target_entity_id.clone(),
                relationship_type: r.relationship_type,
                confidence: r.confidence,
            })
            .collect();

        let mut graph = KnowledgeGraph {
            nodes,
            edges,
            metadata: GraphMetadata {
                workspace_id: workspace_id.to_string(),
                ..GraphMetadata::default()
            },
        };
        graph.refresh_degrees();
        graph.refresh_metadata();

        debug!(
            "Built graph for '{}': {} nodes, {} edges",
            workspace_id,
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }
}

/// Merge graphs by node/edge id, keeping the higher-confidence instance on
/// collision. Zero graphs is a contract error; one graph is returned
/// unchanged.
pub fn merge_graphs(mut graphs: Vec<KnowledgeGraph>) -> Result<KnowledgeGraph> {
    if graphs.len() <= 1 {
        return graphs
            .pop()
            .ok_or_else(|| KbError::Graph("cannot merge zero graphs".to_string()));
    }

    let workspace_id = graphs[0].metadata.workspace_id.clone();
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut node_index: HashMap<String, usize> = HashMap::new();
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut edge_index: HashMap<String, usize> = HashMap::new();

    for graph in graphs {
        for node in graph.nodes {
            match node_index.get(&node.id) {
                Some(&i) => {
                    if node.confidence > nodes[i].confidence {
                        nodes[i] = node;
                    }
                }
                None => {
                    node_index.insert(node.id.clone(), nodes.len());
                    nodes.push(node);
                }
            }
        }
        for edge in graph.edges {
            match edge_index.get(&edge.id) {
                Some(&i) => {
                    if edge.confidence > edges[i].confidence {
                        edges[i] = edge;
                    }
                }
                None => {
                    edge_index.insert(edge.id.clone(), edges.len());
                    edges.push(edge);
                }
            }
        }
    }

    let mut merged = KnowledgeGraph {
        nodes,
        edges,
        metadata: GraphMetadata {
            workspace_id,
            ..GraphMetadata::default()
        },
    };
    merged.refresh_degrees();
    merged.refresh_metadata();
    Ok(merged)
}

/// Keep only nodes of the given types, then drop edges whose endpoint was
/// removed. Isolated nodes are kept.
pub fn filter_graph_by_entity_types(
    graph: &KnowledgeGraph,
    types: &[EntityType],
) -> KnowledgeGraph {
    let nodes: Vec<GraphNode> = graph
        .nodes
        .iter()
        .filter(|n| types.contains(&n.entity_type))
        .cloned()
        .collect();
    let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let edges: Vec<GraphEdge> = graph
        .edges
        .iter()
        .filter(|e| node_ids.contains(e.source.as_str()) && node_ids.contains(e.target.as_str()))
        .cloned()
        .collect();

    rebuild(graph, nodes, edges)
}

/// Keep only edges of the given types, then drop nodes left with no edges.
pub fn filter_graph_by_relationship_types(
    graph: &KnowledgeGraph,
    types: &[RelationshipType],
) -> KnowledgeGraph {
    let edges: Vec<GraphEdge> = graph
        .edges
        .iter()
        .filter(|e| types.contains(&e.relationship_type))
        .cloned()
        .collect();

    let connected: HashSet<&str> = edges
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();
    let nodes: Vec<GraphNode> = graph
        .nodes
        .iter()
        .filter(|n| connected.contains(n.id.as_str()))
        .cloned()
        .collect();

    rebuild(graph, nodes, edges)
}

/// Keep only nodes and edges at or above the confidence floor; edges must
/// also retain both endpoints. Isolated nodes are kept.
pub fn filter_graph_by_confidence(graph: &KnowledgeGraph, min_confidence: f32) -> KnowledgeGraph {
    let nodes: Vec<GraphNode> = graph
        .nodes
        .iter()
        .filter(|n| n.confidence >= min_confidence)
        .cloned()
        .collect();
    let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let edges: Vec<GraphEdge> = graph
        .edges
        .iter()
        .filter(|e| e.confidence >= min_confidence)
        .filter(|e| node_ids.contains(e.source.as_str()) && node_ids.contains(e.target.as_str()))
        .cloned()
        .collect();

    rebuild(graph, nodes, edges)
}

fn rebuild(source: &KnowledgeGraph, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph {
        nodes,
        edges,
        metadata: GraphMetadata {
            workspace_id: source.metadata.workspace_id.clone(),
            ..GraphMetadata::default()
        },
    };
    graph.refresh_degrees();
    graph.refresh_metadata();
    graph
}
