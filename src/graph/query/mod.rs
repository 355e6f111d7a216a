#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::extraction::EntityType;
use crate::graph::{GraphEdge, GraphMetadata, GraphNode, KnowledgeGraph};

/// How an edge is oriented relative to the node being inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// A direct neighbor plus the edge connecting it.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<'a> {
    pub node: &'a GraphNode,
    pub edge: &'a GraphEdge,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraversalOptions {
    pub max_depth: usize,
    /// Maximum number of visited nodes, including the start node.
    pub limit: usize,
    pub entity_types: Option<Vec<EntityType>>,
    pub min_confidence: Option<f32>,
}

impl Default for TraversalOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_depth: 3,
            limit: 100,
            entity_types: None,
            min_confidence: None,
        }
    }
}

/// A node reached during traversal, with its hop distance from the start.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalNode<'a> {
    pub node: &'a GraphNode,
    pub depth: usize,
}

struct AdjacencyEntry<'a> {
    neighbor: &'a str,
    edge: &'a GraphEdge,
    direction: Direction,
}

/// Read-only query engine over a built graph. Traversals treat edges as
/// traversable in both directions; every lookup for an unknown node id
/// returns an empty result rather than an error.
pub struct GraphQuery<'a> {
    graph: &'a KnowledgeGraph,
    nodes: HashMap<&'a str, &'a GraphNode>,
    adjacency: HashMap<&'a str, Vec<AdjacencyEntry<'a>>>,
}

impl<'a> GraphQuery<'a> {
    pub fn new(graph: &'a KnowledgeGraph) -> Self {
        let nodes: HashMap<&str, &GraphNode> =
            graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut adjacency: HashMap<&str, Vec<AdjacencyEntry<'_>>> = HashMap::new();
        for edge in &graph.edges {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(AdjacencyEntry {
                    neighbor: edge.target.as_str(),
                    edge,
                    direction: Direction::Outgoing,
                });
            adjacency
                .entry(edge.target.as_str())
                .or_default()
                .push(AdjacencyEntry {
                    neighbor: edge.source.as_str(),
                    edge,
                    direction: Direction::Incoming,
                });
        }

        Self {
            graph,
            nodes,
            adjacency,
        }
    }

    fn entries(&self, id: &str) -> &[AdjacencyEntry<'a>] {
        self.adjacency.get(id).map_or(&[], Vec::as_slice)
    }

    fn passes(node: &GraphNode, options: &TraversalOptions) -> bool {
        options
            .entity_types
            .as_ref()
            .is_none_or(|types| types.contains(&node.entity_type))
            && options
                .min_confidence
                .is_none_or(|min| node.confidence >= min)
    }

    /// Direct neighbors of a node, tagged with edge direction.
    pub fn neighborhood(&self, node_id: &str) -> Vec<Neighbor<'a>> {
        self.entries(node_id)
            .iter()
            .filter_map(|entry| {
                self.nodes.get(entry.neighbor).map(|&node| Neighbor {
                    node,
                    edge: entry.edge,
                    direction: entry.direction,
                })
            })
            .collect()
    }

    /// Breadth-first expansion from a start node. Nodes failing the filters
    /// are skipped and never expanded from.
    pub fn traverse(&self, start: &str, options: &TraversalOptions) -> Vec<TraversalNode<'a>> {
        let Some(&start_node) = self.nodes.get(start) else {
            return Vec::new();
        };
        if options.limit == 0 || !Self::passes(start_node, options) {
            return Vec::new();
        }

        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 0)]);
        let mut result = vec![TraversalNode {
            node: start_node,
            depth: 0,
        }];

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= options.max_depth {
                continue;
            }
            for entry in self.entries(id) {
                if result.len() >= options.limit {
                    return result;
                }
                if visited.contains(entry.neighbor) {
                    continue;
                }
                let Some(&node) = self.nodes.get(entry.neighbor) else {
                    continue;
                };
                visited.insert(entry.neighbor);
                if !Self::passes(node, options) {
                    continue;
                }
                result.push(TraversalNode {
                    node,
                    depth: depth + 1,
                });
                queue.push_back((entry.neighbor, depth + 1));
            }
        }

        result
    }

    /// Induced subgraph of everything within `hops` of the center node. An
    /// unknown center yields an empty graph; a disconnected center yields a
    /// single-node, zero-edge graph.
    pub fn ego_graph(&self, center: &str, hops: usize) -> KnowledgeGraph {
        if !self.nodes.contains_key(center) {
            return KnowledgeGraph::default();
        }

        let mut reachable: HashSet<&str> = HashSet::from([center]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(center, 0)]);
        while let Some((id, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            for entry in self.entries(id) {
                if reachable.insert(entry.neighbor) {
                    queue.push_back((entry.neighbor, depth + 1));
                }
            }
        }

        let nodes: Vec<GraphNode> = self
            .graph
            .nodes
            .iter()
            .filter(|n| reachable.contains(n.id.as_str()))
            .cloned()
            .collect();
        let edges: Vec<GraphEdge> = self
            .graph
            .edges
            .iter()
            .filter(|e| {
                reachable.contains(e.source.as_str()) && reachable.contains(e.target.as_str())
            })
            .cloned()
            .collect();

        let mut ego = KnowledgeGraph {
            nodes,
            edges,
            metadata: GraphMetadata {
                workspace_id: self.graph.metadata.workspace_id.clone(),
                ..GraphMetadata::default()
            },
        };
        ego.refresh_degrees();
        ego.refresh_metadata();
        ego
    }

    /// Shortest path by edge count between two nodes, as a sequence of node
    /// ids. `None` when either node is unknown or no path exists within
    /// `max_depth` hops.
    pub fn shortest_path(&self, from: &str, to: &str, max_depth: usize) -> Option<Vec<String>> {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(from, 0)]);

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for entry in self.entries(id) {
                if !visited.insert(entry.neighbor) {
                    continue;
                }
                parents.insert(entry.neighbor, id);
                if entry.neighbor == to {
                    let mut path = vec![to.to_string()];
                    let mut current = to;
                    while let Some(&parent) = parents.get(current) {
                        path.push(parent.to_string());
                        current = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back((entry.neighbor, depth + 1));
            }
        }

        None
    }

    /// Up to `max_paths` simple paths between two nodes, each at most
    /// `max_depth` edges long. Iterative depth-first search with visited-set
    /// rollback, so a node may appear in different paths but never twice in
    /// one.
    pub fn all_paths(
        &self,
        from: &str,
        to: &str,
        max_paths: usize,
        max_depth: usize,
    ) -> Vec<Vec<String>> {
        if max_paths == 0 || !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return Vec::new();
        }
        if from == to {
            return vec![vec![from.to_string()]];
        }

        let mut paths: Vec<Vec<String>> = Vec::new();
        let mut path: Vec<&str> = vec![from];
        let mut cursors: Vec<usize> = vec![0];
        let mut visited: HashSet<&str> = HashSet::from([from]);

        while paths.len() < max_paths {
            let Some(&current) = path.last() else {
                break;
            };
            let Some(cursor) = cursors.last_mut() else {
                break;
            };

            let entries = self.entries(current);
            let depth = path.len() - 1;

            match entries.get(*cursor) {
                Some(entry) if depth < max_depth => {
                    *cursor += 1;
                    if entry.neighbor == to {
                        let mut found: Vec<String> =
                            path.iter().map(|id| (*id).to_string()).collect();
                        found.push(to.to_string());
                        paths.push(found);
                    } else if !visited.contains(entry.neighbor) {
                        visited.insert(entry.neighbor);
                        path.push(entry.neighbor);
                        cursors.push(0);
                    }
                }
                _ => {
                    // Exhausted this node (or hit the depth bound): backtrack.
                    if let Some(done) = path.pop() {
                        visited.remove(done);
                    }
                    cursors.pop();
                }
            }
        }

        paths
    }

    /// Degree centrality per node, normalized by the maximum observed degree.
    /// Edge-free graphs yield 0.0 for every node; empty graphs yield an empty
    /// map.
    pub fn centrality(&self) -> HashMap<String, f32> {
        let max_degree = self
            .graph
            .nodes
            .iter()
            .map(|n| self.entries(&n.id).len())
            .max()
            .unwrap_or(0);

        self.graph
            .nodes
            .iter()
            .map(|n| {
                let centrality = if max_degree == 0 {
                    0.0
                } else {
                    self.entries(&n.id).len() as f32 / max_degree as f32
                };
                (n.id.clone(), centrality)
            })
            .collect()
    }

    /// Connected components over undirected adjacency, sorted largest-first.
    /// Isolated nodes form singleton components.
    pub fn clusters(&self) -> Vec<Vec<String>> {
        let mut components: Vec<Vec<String>> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for node in &self.graph.nodes {
            if seen.contains(node.id.as_str()) {
                continue;
            }

            let mut component = Vec::new();
            let mut stack = vec![node.id.as_str()];
            seen.insert(node.id.as_str());
            while let Some(id) = stack.pop() {
                component.push(id.to_string());
                for entry in self.entries(id) {
                    if seen.insert(entry.neighbor) {
                        stack.push(entry.neighbor);
                    }
                }
            }
            components.push(component);
        }

        components.sort_by_key(|c| std::cmp::Reverse(c.len()));
        components
    }
}
