use super::*;

use crate::extraction::relationships::RelationshipType;

fn node(id: &str, entity_type: EntityType, confidence: f32) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        name: id.to_string(),
        entity_type,
        confidence,
        description: None,
        degree: 0,
        centrality: None,
    }
}

fn edge(id: &str, source: &str, target: &str) -> GraphEdge {
    GraphEdge {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        relationship_type: RelationshipType::RelatedTo,
        confidence: 0.8,
    }
}

fn graph(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph {
        nodes,
        edges,
        ..KnowledgeGraph::default()
    };
    graph.refresh_degrees();
    graph.refresh_metadata();
    graph
}

/// a -> b -> c -> d, with e isolated.
fn chain_graph() -> KnowledgeGraph {
    graph(
        vec![
            node("a", EntityType::Company, 0.9),
            node("b", EntityType::Product, 0.8),
            node("c", EntityType::Feature, 0.7),
            node("d", EntityType::Benefit, 0.6),
            node("e", EntityType::Person, 0.5),
        ],
        vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "c"),
            edge("e3", "c", "d"),
        ],
    )
}

/// a -> b -> d and a -> c -> d.
fn diamond_graph() -> KnowledgeGraph {
    graph(
        vec![
            node("a", EntityType::Company, 0.9),
            node("b", EntityType::Product, 0.8),
            node("c", EntityType::Service, 0.8),
            node("d", EntityType::Feature, 0.7),
        ],
        vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "d"),
            edge("e3", "a", "c"),
            edge("e4", "c", "d"),
        ],
    )
}

#[test]
fn neighborhood_tags_directions() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    let neighbors = query.neighborhood("b");
    assert_eq!(neighbors.len(), 2);

    let incoming: Vec<&str> = neighbors
        .iter()
        .filter(|n| n.direction == Direction::Incoming)
        .map(|n| n.node.id.as_str())
        .collect();
    let outgoing: Vec<&str> = neighbors
        .iter()
        .filter(|n| n.direction == Direction::Outgoing)
        .map(|n| n.node.id.as_str())
        .collect();
    assert_eq!(incoming, vec!["a"]);
    assert_eq!(outgoing, vec!["c"]);
}

#[test]
fn neighborhood_of_unknown_node_is_empty() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);
    assert!(query.neighborhood("ghost").is_empty());
}

#[test]
fn traverse_respects_max_depth() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    let reached = query.traverse(
        "a",
        &TraversalOptions {
            max_depth: 2,
            ..TraversalOptions::default()
        },
    );

    let ids: Vec<&str> = reached.iter().map(|t| t.node.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(reached[2].depth, 2);
}

#[test]
fn traverse_depth_zero_is_start_only() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    let reached = query.traverse(
        "a",
        &TraversalOptions {
            max_depth: 0,
            ..TraversalOptions::default()
        },
    );
    assert_eq!(reached.len(), 1);
    assert_eq!(reached[0].node.id, "a");
}

#[test]
fn traverse_respects_node_limit() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    let reached = query.traverse(
        "a",
        &TraversalOptions {
            limit: 2,
            ..TraversalOptions::default()
        },
    );
    assert_eq!(reached.len(), 2);
}

#[test]
fn traverse_skips_filtered_nodes_without_expanding_them() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    // 'b' fails the filter, so 'c' and 'd' are unreachable even though they
    // would pass it.
    let reached = query.traverse(
        "a",
        &TraversalOptions {
            entity_types: Some(vec![
                EntityType::Company,
                EntityType::Feature,
                EntityType::Benefit,
            ]),
            ..TraversalOptions::default()
        },
    );

    let ids: Vec<&str> = reached.iter().map(|t| t.node.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
}

#[test]
fn traverse_from_unknown_node_is_empty() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);
    assert!(query.traverse("ghost", &TraversalOptions::default()).is_empty());
}

#[test]
fn ego_graph_induces_interconnecting_edges() {
    let g = diamond_graph();
    let query = GraphQuery::new(&g);

    let ego = query.ego_graph("b", 1);

    let ids: Vec<&str> = ego.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "d"]);
    // Only edges between included nodes survive; a->c and c->d do not.
    let edge_ids: Vec<&str> = ego.edges.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(edge_ids, vec!["e1", "e2"]);
    assert_eq!(ego.metadata.node_count, 3);
}

#[test]
fn ego_graph_of_disconnected_node_is_single_node() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    let ego = query.ego_graph("e", 2);
    assert_eq!(ego.nodes.len(), 1);
    assert_eq!(ego.nodes[0].id, "e");
    assert!(ego.edges.is_empty());
}

#[test]
fn ego_graph_of_unknown_node_is_empty() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    let ego = query.ego_graph("ghost", 2);
    assert!(ego.nodes.is_empty());
    assert!(ego.edges.is_empty());
}

#[test]
fn shortest_path_follows_edges_both_ways() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    // d -> a walks against edge direction.
    let path = query.shortest_path("d", "a", 10).expect("path exists");
    assert_eq!(path, vec!["d", "c", "b", "a"]);
}

#[test]
fn shortest_path_prefers_fewest_edges() {
    let mut g = diamond_graph();
    g.edges.push(edge("e5", "a", "d"));
    g.refresh_degrees();
    g.refresh_metadata();
    let query = GraphQuery::new(&g);

    let path = query.shortest_path("a", "d", 10).expect("path exists");
    assert_eq!(path, vec!["a", "d"]);
}

#[test]
fn shortest_path_is_none_when_unreachable() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    assert!(query.shortest_path("a", "e", 10).is_none());
    assert!(query.shortest_path("a", "ghost", 10).is_none());
    // Reachable, but not within the hop budget.
    assert!(query.shortest_path("a", "d", 2).is_none());
}

#[test]
fn shortest_path_to_self_is_the_node() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);
    assert_eq!(query.shortest_path("a", "a", 10), Some(vec!["a".to_string()]));
}

#[test]
fn all_paths_finds_every_simple_path() {
    let g = diamond_graph();
    let query = GraphQuery::new(&g);

    let mut paths = query.all_paths("a", "d", 10, 5);
    paths.sort();

    assert_eq!(
        paths,
        vec![
            vec!["a".to_string(), "b".to_string(), "d".to_string()],
            vec!["a".to_string(), "c".to_string(), "d".to_string()],
        ]
    );
}

#[test]
fn all_paths_respects_max_paths_and_depth() {
    let g = diamond_graph();
    let query = GraphQuery::new(&g);

    assert_eq!(query.all_paths("a", "d", 1, 5).len(), 1);
    // Each route needs two edges.
    assert!(query.all_paths("a", "d", 10, 1).is_empty());
}

#[test]
fn all_paths_excludes_repeated_nodes_within_a_path() {
    // Triangle plus a tail: a-b, b-c, c-a, c-d.
    let g = graph(
        vec![
            node("a", EntityType::Company, 0.9),
            node("b", EntityType::Product, 0.8),
            node("c", EntityType::Service, 0.8),
            node("d", EntityType::Feature, 0.7),
        ],
        vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "c"),
            edge("e3", "c", "a"),
            edge("e4", "c", "d"),
        ],
    );
    let query = GraphQuery::new(&g);

    let mut paths = query.all_paths("a", "d", 10, 5);
    paths.sort();

    assert_eq!(
        paths,
        vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
            vec!["a".to_string(), "c".to_string(), "d".to_string()],
        ]
    );
    for path in &paths {
        let unique: std::collections::HashSet<&String> = path.iter().collect();
        assert_eq!(unique.len(), path.len());
    }
}

#[test]
fn centrality_normalizes_by_max_degree() {
    // Star: hub connected to three leaves.
    let g = graph(
        vec![
            node("hub", EntityType::Company, 0.9),
            node("l1", EntityType::Product, 0.8),
            node("l2", EntityType::Service, 0.8),
            node("l3", EntityType::Feature, 0.8),
        ],
        vec![
            edge("e1", "hub", "l1"),
            edge("e2", "hub", "l2"),
            edge("e3", "hub", "l3"),
        ],
    );
    let query = GraphQuery::new(&g);

    let centrality = query.centrality();
    assert!((centrality["hub"] - 1.0).abs() < f32::EPSILON);
    assert!((centrality["l1"] - 1.0 / 3.0).abs() < 1e-6);
}

#[test]
fn centrality_without_edges_is_zero() {
    let g = graph(
        vec![
            node("a", EntityType::Company, 0.9),
            node("b", EntityType::Product, 0.8),
        ],
        Vec::new(),
    );
    let query = GraphQuery::new(&g);

    let centrality = query.centrality();
    assert_eq!(centrality.len(), 2);
    assert!(centrality.values().all(|&c| c == 0.0));
}

#[test]
fn centrality_of_empty_graph_is_empty() {
    let g = KnowledgeGraph::default();
    let query = GraphQuery::new(&g);
    assert!(query.centrality().is_empty());
}

#[test]
fn clusters_are_sorted_largest_first() {
    let g = chain_graph();
    let query = GraphQuery::new(&g);

    let clusters = query.clusters();
    let sizes: Vec<usize> = clusters.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 1]);
    assert_eq!(clusters[1], vec!["e".to_string()]);

    let mut component = clusters[0].clone();
    component.sort();
    assert_eq!(component, vec!["a", "b", "c", "d"]);
}
