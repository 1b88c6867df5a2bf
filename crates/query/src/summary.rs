use index::{GraphEdge, GraphNode};
use std::collections::{HashMap, HashSet};

const MAX_NODES_PER_GROUP: usize = 5;
const MAX_RELATION_LINES: usize = 10;

/// Label every extracted entity carries; says nothing about its kind.
const PLACEHOLDER_LABEL: &str = "entity";

/// Nodes that stand for stored text rather than knowledge.
const SOURCE_LABELS: &[&str] = &["document", "chunk", "passage"];

/// Controlled-vocabulary labels and how they read to a user.
fn display_label(raw: &str) -> String {
    let translated = match raw.to_ascii_uppercase().as_str() {
        "PERSON" => "People",
        "ORGANIZATION" | "ORG" => "Organizations",
        "TEAM" => "Teams",
        "PROJECT" => "Projects",
        "PRODUCT" => "Products",
        "TECHNOLOGY" => "Technologies",
        "LOCATION" => "Locations",
        "CONCEPT" => "Concepts",
        "EVENT" => "Events",
        "WORKS_ON" => "works on",
        "WORKS_FOR" => "works for",
        "MANAGES" => "manages",
        "REPORTS_TO" => "reports to",
        "MEMBER_OF" => "member of",
        "PART_OF" => "part of",
        "LOCATED_IN" => "located in",
        "USES" => "uses",
        "DEPENDS_ON" => "depends on",
        "CREATED_BY" => "created by",
        "RELATED_TO" => "related to",
        _ => return raw.to_string(),
    };
    translated.to_string()
}

fn is_source_node(node: &GraphNode) -> bool {
    node.labels
        .iter()
        .any(|l| SOURCE_LABELS.contains(&l.to_ascii_lowercase().as_str()))
}

fn type_label(node: &GraphNode) -> Option<&str> {
    node.labels
        .iter()
        .map(String::as_str)
        .find(|l| !l.eq_ignore_ascii_case(PLACEHOLDER_LABEL))
}

fn node_name(node: &GraphNode) -> &str {
    node.display_text()
        .or_else(|| node.property_id())
        .unwrap_or(&node.id)
}

/// Render traversal output as a prompt block. Empty when there is nothing to say.
pub fn render_graph_summary(nodes: &[GraphNode], edges: &[GraphEdge]) -> String {
    if nodes.is_empty() {
        return String::new();
    }

    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for node in nodes.iter().filter(|n| !is_source_node(n)) {
        let Some(label) = type_label(node) else {
            continue;
        };
        let name = node_name(node);
        match groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, names)) => {
                if names.len() < MAX_NODES_PER_GROUP {
                    names.push(name);
                }
            }
            None => groups.push((label, vec![name])),
        }
    }

    // backends expose ids either as the store id or as an `id` property
    let mut by_id: HashMap<&str, &GraphNode> = HashMap::new();
    for node in nodes {
        by_id.insert(node.id.as_str(), node);
        if let Some(pid) = node.property_id() {
            by_id.entry(pid).or_insert(node);
        }
    }

    let mut seen = HashSet::new();
    let mut relations = Vec::new();
    for edge in edges {
        if relations.len() >= MAX_RELATION_LINES {
            break;
        }
        let (Some(source), Some(target)) = (by_id.get(edge.source.as_str()), by_id.get(edge.target.as_str()))
        else {
            continue;
        };
        if is_source_node(source) || is_source_node(target) {
            continue;
        }
        let line = format!(
            "{} → {} → {}",
            node_name(source),
            display_label(&edge.relation),
            node_name(target)
        );
        if seen.insert(line.clone()) {
            relations.push(line);
        }
    }

    if groups.is_empty() && relations.is_empty() {
        return String::new();
    }

    let mut out = String::from("Knowledge graph context:\n");
    for (label, names) in &groups {
        out.push_str(&format!("{}:\n", display_label(label)));
        for name in names {
            out.push_str(&format!("- {}\n", name));
        }
    }
    if !relations.is_empty() {
        out.push_str("Relationships:\n");
        for line in &relations {
            out.push_str(&format!("- {}\n", line));
        }
    }
    out
}
