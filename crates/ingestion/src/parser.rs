//! Extraction response parsing and normalization
//!
//! The model answers in free text that should contain one JSON object of the
//! form `{"nodes": [...], "rels": [...]}`. This module finds that object,
//! decodes it leniently, and normalizes identifiers, labels and property keys.

use chrono::{DateTime, Utc};
use kgforge_common::errors::{AppError, Result};
use kgforge_common::graph::{props, GraphDocument, GraphNode, GraphRelationship, NodeRef, Properties, SessionId};
use kgforge_common::Language;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Label used when the model omits a node type
const DEFAULT_LABEL: &str = "Entity";

/// Relationship type used when the model omits one
const DEFAULT_RELATIONSHIP: &str = "RELATED_TO";

/// Find the first balanced `{...}` substring, skipping braces inside strings
pub fn locate_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Raw extraction payload as the model returned it
#[derive(Debug, Default, Deserialize)]
pub struct ExtractedGraph {
    #[serde(default)]
    pub nodes: Vec<ExtractedNode>,
    #[serde(default, alias = "relationships")]
    pub rels: Vec<ExtractedRelationship>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractedNode {
    #[serde(default)]
    pub id: Value,
    #[serde(default, rename = "type", alias = "label")]
    pub node_type: Value,
    #[serde(default)]
    pub properties: Option<RawProperties>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractedRelationship {
    pub source: RawEndpoint,
    pub target: RawEndpoint,
    #[serde(default, rename = "type")]
    pub rel_type: Value,
    #[serde(default)]
    pub properties: Option<RawProperties>,
}

/// Endpoint given either as `{"id": .., "type": ..}` or as a bare id
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawEndpoint {
    Node {
        id: Value,
        #[serde(default, rename = "type", alias = "label")]
        node_type: Value,
    },
    Id(Value),
}

/// Properties as a list of `{key, value}` pairs or as a flat object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawProperties {
    Pairs(Vec<RawProperty>),
    Map(serde_json::Map<String, Value>),
}

#[derive(Debug, Deserialize)]
pub struct RawProperty {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Locate and decode the extraction payload in a raw model response
pub fn parse_extraction(raw: &str) -> Result<ExtractedGraph> {
    let object = locate_json_object(raw)
        .ok_or_else(|| AppError::extraction_parse("no JSON object found in extraction response"))?;

    serde_json::from_str(object)
        .map_err(|e| AppError::extraction_parse(format!("invalid extraction payload: {}", e)))
}

/// Scalar JSON value as text; `None` for null, arrays and objects become JSON text
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// Title-case each word: upper after any uncased character, lower after a cased one
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_lowercase() || c.is_uppercase();
    }
    out
}

/// First character upper, the rest lower
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// `"Start Date"` to `"startDate"`
pub fn camel_case_key(key: &str) -> String {
    let mut words = key.split_whitespace();
    let Some(first) = words.next() else {
        return key.to_string();
    };
    let mut out = first.to_lowercase();
    for word in words {
        out.push_str(&capitalize(word));
    }
    out
}

fn normalize_properties(raw: Option<&RawProperties>) -> Properties {
    let mut properties = Properties::new();
    match raw {
        Some(RawProperties::Pairs(pairs)) => {
            for pair in pairs {
                if let Some(value) = scalar_to_string(&pair.value) {
                    properties.insert(camel_case_key(&pair.key), value);
                }
            }
        }
        Some(RawProperties::Map(map)) => {
            for (key, value) in map {
                if let Some(value) = scalar_to_string(value) {
                    properties.insert(camel_case_key(key), value);
                }
            }
        }
        None => {}
    }
    properties
}

fn normalize_label(value: &Value) -> String {
    scalar_to_string(value)
        .filter(|s| !s.is_empty())
        .map(|s| capitalize(&s))
        .unwrap_or_else(|| DEFAULT_LABEL.to_string())
}

fn normalize_id(value: &Value) -> Option<String> {
    scalar_to_string(value)
        .filter(|s| !s.is_empty())
        .map(|s| title_case(&s))
}

impl RawEndpoint {
    fn normalize(&self) -> Option<NodeRef> {
        match self {
            RawEndpoint::Node { id, node_type } => {
                Some(NodeRef::new(normalize_id(id)?, normalize_label(node_type)))
            }
            RawEndpoint::Id(id) => Some(NodeRef::new(normalize_id(id)?, DEFAULT_LABEL)),
        }
    }
}

impl ExtractedGraph {
    /// Normalize and stamp every element with session, language and time
    pub fn into_document(
        self,
        session_id: SessionId,
        language: Language,
        created_at: DateTime<Utc>,
    ) -> GraphDocument {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for raw in &self.nodes {
            let Some(id) = normalize_id(&raw.id) else {
                debug!("Dropping extracted node without an id");
                continue;
            };
            let mut properties = normalize_properties(raw.properties.as_ref());
            properties.insert(props::NAME.to_string(), id.clone());

            nodes.push(GraphNode {
                id,
                label: normalize_label(&raw.node_type),
                properties,
                session_id,
                language,
                created_at,
            });
        }

        let mut relationships = Vec::with_capacity(self.rels.len());
        for raw in &self.rels {
            let (Some(source), Some(target)) = (raw.source.normalize(), raw.target.normalize()) else {
                debug!("Dropping extracted relationship with an unusable endpoint");
                continue;
            };
            let rel_type = scalar_to_string(&raw.rel_type)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_RELATIONSHIP.to_string());

            relationships.push(GraphRelationship {
                source,
                target,
                rel_type,
                properties: normalize_properties(raw.properties.as_ref()),
                session_id,
                language,
                created_at,
            });
        }

        GraphDocument::new(nodes, relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgforge_common::errors::ErrorCode;

    const LEASE_RESPONSE: &str = r#"Here is the graph:
```json
{
  "nodes": [
    {"id": "acme corp", "type": "ORGANIZATION", "properties": [{"key": "Registered Name", "value": "Acme Corp {Ltd}"}]},
    {"id": "john smith", "type": "person", "properties": {"role": "Tenant", "age": 42}}
  ],
  "rels": [
    {"source": {"id": "acme corp", "type": "ORGANIZATION"},
     "target": {"id": "john smith", "type": "PERSON"},
     "type": "LEASES_TO",
     "properties": [{"key": "start date", "value": "2024-01-01"}]}
  ]
}
```
Done."#;

    #[test]
    fn test_locate_skips_braces_in_strings() {
        let text = r#"noise {"a": "x}y", "b": {"c": "\"}"}} trailing }"#;
        assert_eq!(
            locate_json_object(text),
            Some(r#"{"a": "x}y", "b": {"c": "\"}"}}"#)
        );
    }

    #[test]
    fn test_locate_none() {
        assert_eq!(locate_json_object("no json here"), None);
        assert_eq!(locate_json_object("{ unbalanced"), None);
    }

    #[test]
    fn test_parse_and_normalize_lease() {
        let graph = parse_extraction(LEASE_RESPONSE).unwrap();
        let now = Utc::now();
        let doc = graph.into_document(5, Language::English, now);

        assert_eq!(doc.node_count(), 2);
        assert_eq!(doc.relationship_count(), 1);

        let acme = &doc.nodes[0];
        assert_eq!(acme.id, "Acme Corp");
        assert_eq!(acme.label, "Organization");
        assert_eq!(acme.name(), Some("Acme Corp"));
        assert_eq!(acme.property("registeredName"), Some("Acme Corp {Ltd}"));
        assert_eq!(acme.session_id, 5);
        assert_eq!(acme.created_at, now);

        let john = &doc.nodes[1];
        assert_eq!(john.label, "Person");
        assert_eq!(john.property("age"), Some("42"));

        let rel = &doc.relationships[0];
        assert_eq!(rel.source, NodeRef::new("Acme Corp", "Organization"));
        assert_eq!(rel.target, NodeRef::new("John Smith", "Person"));
        assert_eq!(rel.rel_type, "LEASES_TO");
        assert_eq!(rel.properties.get("startDate").map(String::as_str), Some("2024-01-01"));
        assert_eq!(rel.language, Language::English);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_extraction("I could not find anything").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExtractionParseError);

        let err = parse_extraction(r#"{"nodes": "not a list"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExtractionParseError);
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let doc = parse_extraction("{}")
            .unwrap()
            .into_document(1, Language::Arabic, Utc::now());
        assert!(doc.is_empty());
    }

    #[test]
    fn test_arabic_ids_are_preserved() {
        let raw = r#"{"nodes": [{"id": "شركة النور", "type": "organization"}], "rels": []}"#;
        let doc = parse_extraction(raw)
            .unwrap()
            .into_document(1, Language::Arabic, Utc::now());
        assert_eq!(doc.nodes[0].id, "شركة النور");
        assert_eq!(doc.nodes[0].label, "Organization");
    }

    #[test]
    fn test_case_helpers() {
        assert_eq!(title_case("JOHN o'neil-smith"), "John O'Neil-Smith");
        assert_eq!(capitalize("CONTRACT"), "Contract");
        assert_eq!(capitalize(""), "");
        assert_eq!(camel_case_key("Start   Date of LEASE"), "startDateOfLease");
        assert_eq!(camel_case_key("amount"), "amount");
        assert_eq!(camel_case_key("  "), "  ");
    }

    #[test]
    fn test_bare_endpoints_and_missing_ids() {
        let raw = r#"{"nodes": [{"type": "Person"}], "rels": [{"source": "alice", "target": {"id": null}, "type": "KNOWS"}, {"source": "alice", "target": "bob"}]}"#;
        let doc = parse_extraction(raw)
            .unwrap()
            .into_document(1, Language::English, Utc::now());
        assert!(doc.nodes.is_empty());
        assert_eq!(doc.relationship_count(), 1);
        assert_eq!(doc.relationships[0].source, NodeRef::new("Alice", "Entity"));
        assert_eq!(doc.relationships[0].rel_type, "RELATED_TO");
    }
}
