
use std::fmt::Write;

use crate::graph::KnowledgeGraph;

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render the graph in Graphviz DOT format.
pub fn to_dot(graph: &KnowledgeGraph) -> String {
    let mut out = String::from("digraph knowledge_graph {\n");
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, style=rounded];");

    for node in &graph.nodes {
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\\n({})\"];",
            dot_escape(&node.id),
            dot_escape(&node.name),
            node.entity_type
        );
    }
    for edge in &graph.edges {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            dot_escape(&edge.source),
            dot_escape(&edge.target),
            edge.relationship_type
        );
    }

    out.push_str("}\n");
    out
}

/// Render the graph in GraphML, with name/type/confidence attributes.
pub fn to_graphml(graph: &KnowledgeGraph) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n\
         \x20 <key id=\"name\" for=\"node\" attr.name=\"name\" attr.type=\"string\"/>\n\
         \x20 <key id=\"type\" for=\"node\" attr.name=\"type\" attr.type=\"string\"/>\n\
         \x20 <key id=\"confidence\" for=\"node\" attr.name=\"confidence\" attr.type=\"float\"/>\n\
         \x20 <key id=\"relationship\" for=\"edge\" attr.name=\"relationship\" attr.type=\"string\"/>\n\
         \x20 <graph id=\"knowledge_graph\" edgedefault=\"directed\">\n",
    );

    for node in &graph.nodes {
        let _ = writeln!(out, "    <node id=\"{}\">", xml_escape(&node.id));
        let _ = writeln!(
            out,
            "      <data key=\"name\">{}</data>",
            xml_escape(&node.name)
        );
        let _ = writeln!(out, "      <data key=\"type\">{}</data>", node.entity_type);
        let _ = writeln!(
            out,
            "      <data key=\"confidence\">{}</data>",
            node.confidence
        );
        let _ = writeln!(out, "    </node>");
    }
    for edge in &graph.edges {
        let _ = writeln!(
            out,
            "    <edge id=\"{}\" source=\"{}\" target=\"{}\">",
            xml_escape(&edge.id),
            xml_escape(&edge.source),
            xml_escape(&edge.target)
        );
        let _ = writeln!(
            out,
            "      <data key=\"relationship\">{}</data>",
            edge.relationship_type
        );
        let _ = writeln!(out, "    </edge>");
    }

    out.push_str("  </graph>\n</graphml>\n");
    out
}

/// Render the graph as Cytoscape.js elements JSON.
pub fn to_cytoscape(graph: &KnowledgeGraph) -> serde_json::Value {
    let nodes: Vec<serde_json::Value> = graph
        .nodes
        .iter()
        .map(|n| {
            serde_json::json!({
                "data": {
                    "id": n.id,
                    "label": n.name,
                    "type": n.entity_type,
                    "confidence": n.confidence,
                    "degree": n.degree,
                }
            })
        })
        .collect();

    let edges: Vec<serde_json::Value> = graph
        .edges
        .iter()
        .map(|e| {
            serde_json::json!({
                "data": {
                    "id": e.id,
                    "source": e.source,
                    "target": e.target,
                    "relationship": e.relationship_type,
                    "confidence": e.confidence,
                }
            })
        })
        .collect();

    serde_json::json!({
        "elements": {
            "nodes": nodes,
            "edges": edges,
        }
    })
}
