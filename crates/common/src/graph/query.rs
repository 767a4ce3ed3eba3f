//! Structured node queries
//!
//! A [`NodeQuery`] is always scoped to one session: the only constructor takes
//! the session id. Adapters either evaluate the query in process
//! ([`NodeQuery::apply`]) or compile it to their own query language.

use super::model::{GraphNode, SessionId};
use std::cmp::Ordering;

/// Addressable part of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Id,
    Label,
    Language,
    CreatedAt,
    Property(String),
}

impl Field {
    pub fn property(name: impl Into<String>) -> Self {
        Field::Property(name.into())
    }

    /// Textual value of the field on a node
    pub fn value_of(&self, node: &GraphNode) -> Option<String> {
        match self {
            Field::Id => Some(node.id.clone()),
            Field::Label => Some(node.label.clone()),
            Field::Language => Some(node.language.as_str().to_string()),
            Field::CreatedAt => Some(node.created_at.to_rfc3339()),
            Field::Property(key) => node.properties.get(key).cloned(),
        }
    }
}

/// Boolean condition on a node
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Exact, case-sensitive equality
    Eq(Field, String),
    /// Case-insensitive substring containment
    Contains(Field, String),
    EqualsIgnoreCase(Field, String),
    StartsWithIgnoreCase(Field, String),
    /// Some property outside `exclude` contains `needle`, case-insensitive
    AnyPropertyContains { exclude: Vec<String>, needle: String },
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, node: &GraphNode) -> bool {
        match self {
            Predicate::Eq(field, value) => field.value_of(node).as_deref() == Some(value.as_str()),
            Predicate::Contains(field, needle) => field
                .value_of(node)
                .map(|v| v.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Predicate::EqualsIgnoreCase(field, value) => field
                .value_of(node)
                .map(|v| v.to_lowercase() == value.to_lowercase())
                .unwrap_or(false),
            Predicate::StartsWithIgnoreCase(field, prefix) => field
                .value_of(node)
                .map(|v| v.to_lowercase().starts_with(&prefix.to_lowercase()))
                .unwrap_or(false),
            Predicate::AnyPropertyContains { exclude, needle } => {
                let needle = needle.to_lowercase();
                node.properties
                    .iter()
                    .filter(|(k, _)| !exclude.iter().any(|e| e == *k))
                    .any(|(_, v)| v.to_lowercase().contains(&needle))
            }
            Predicate::Or(preds) => preds.iter().any(|p| p.matches(node)),
            Predicate::And(preds) => preds.iter().all(|p| p.matches(node)),
        }
    }
}

/// 1-based index of the first matching predicate; `len + 1` when none match
pub fn first_matching_tier(preds: &[Predicate], node: &GraphNode) -> u32 {
    preds
        .iter()
        .position(|p| p.matches(node))
        .unwrap_or(preds.len()) as u32
        + 1
}

/// Ordering key, applied in sequence
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// Ascending by [`first_matching_tier`]
    FirstMatching(Vec<Predicate>),
    /// Descending by field value; `CreatedAt` compares as a timestamp
    Desc(Field),
    /// Ascending by the integer value of the field; non-numeric sorts last
    AscNumeric(Field),
}

impl SortKey {
    fn compare(&self, a: &GraphNode, b: &GraphNode) -> Ordering {
        match self {
            SortKey::FirstMatching(preds) => {
                first_matching_tier(preds, a).cmp(&first_matching_tier(preds, b))
            }
            SortKey::Desc(Field::CreatedAt) => b.created_at.cmp(&a.created_at),
            SortKey::Desc(field) => field.value_of(b).cmp(&field.value_of(a)),
            SortKey::AscNumeric(field) => {
                let parse = |n: &GraphNode| field.value_of(n).and_then(|v| v.parse::<i64>().ok());
                match (parse(a), parse(b)) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        }
    }
}

/// Session-scoped node query
#[derive(Debug, Clone, PartialEq)]
pub struct NodeQuery {
    session_id: SessionId,
    label: Option<String>,
    filters: Vec<Predicate>,
    sort: Vec<SortKey>,
    limit: Option<usize>,
}

impl NodeQuery {
    /// Start a query over one session's nodes
    pub fn in_session(session_id: SessionId) -> Self {
        Self {
            session_id,
            label: None,
            filters: Vec::new(),
            sort: Vec::new(),
            limit: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a condition; all conditions must hold
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn label_filter(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn filters(&self) -> &[Predicate] {
        &self.filters
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    pub fn matches(&self, node: &GraphNode) -> bool {
        node.session_id == self.session_id
            && self.label.as_deref().map_or(true, |l| node.label == l)
            && self.filters.iter().all(|p| p.matches(node))
    }

    /// Evaluate against an in-process node collection
    pub fn apply<'a>(&self, nodes: impl IntoIterator<Item = &'a GraphNode>) -> Vec<GraphNode> {
        let mut matched: Vec<GraphNode> = nodes
            .into_iter()
            .filter(|n| self.matches(n))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            self.sort
                .iter()
                .map(|key| key.compare(a, b))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}
