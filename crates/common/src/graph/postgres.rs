//! PostgreSQL graph store
//!
//! Emulates a property graph with two tables: `graph_nodes` keyed by
//! (session_id, node_id, label) and `graph_relationships` keyed by
//! (session_id, source_id, target_id, rel_type). Properties are JSONB.
//! [`NodeQuery`] values are compiled to parameterized SQL.

use super::model::{
    Expansion, GraphDocument, GraphNode, GraphRelationship, NodeCount, NodeRef, Properties,
    RelationshipCount, SessionId,
};
use super::query::{Field, NodeQuery, Predicate, SortKey};
use super::store::GraphStore;
use crate::config::StoreConfig;
use crate::errors::{AppError, Result};
use crate::language::Language;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QueryResult,
    Statement, TransactionTrait, Value,
};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS graph_nodes (
        session_id BIGINT NOT NULL,
        node_id TEXT NOT NULL,
        label TEXT NOT NULL,
        properties JSONB NOT NULL DEFAULT '{}'::jsonb,
        language TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (session_id, node_id, label)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_graph_nodes_session_label ON graph_nodes (session_id, label)",
    r#"
    CREATE TABLE IF NOT EXISTS graph_relationships (
        session_id BIGINT NOT NULL,
        source_id TEXT NOT NULL,
        source_label TEXT NOT NULL,
        target_id TEXT NOT NULL,
        target_label TEXT NOT NULL,
        rel_type TEXT NOT NULL,
        properties JSONB NOT NULL DEFAULT '{}'::jsonb,
        language TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (session_id, source_id, target_id, rel_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_graph_rels_source ON graph_relationships (session_id, source_id)",
    "CREATE INDEX IF NOT EXISTS idx_graph_rels_target ON graph_relationships (session_id, target_id)",
];

const UPSERT_NODE: &str = r#"
    INSERT INTO graph_nodes (session_id, node_id, label, properties, language, created_at)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (session_id, node_id, label) DO UPDATE SET
        properties = graph_nodes.properties || EXCLUDED.properties,
        language = EXCLUDED.language,
        created_at = EXCLUDED.created_at
"#;

const UPSERT_RELATIONSHIP: &str = r#"
    INSERT INTO graph_relationships (
        session_id, source_id, source_label, target_id, target_label,
        rel_type, properties, language, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (session_id, source_id, target_id, rel_type) DO UPDATE SET
        source_label = EXCLUDED.source_label,
        target_label = EXCLUDED.target_label,
        properties = graph_relationships.properties || EXCLUDED.properties,
        language = EXCLUDED.language,
        created_at = EXCLUDED.created_at
"#;

const NODE_COLUMNS: &str = "node_id, label, properties, session_id, language, created_at";

/// Graph store backed by PostgreSQL
#[derive(Clone)]
pub struct PgGraphStore {
    db: DatabaseConnection,
}

impl PgGraphStore {
    /// Connect using the store section of the configuration
    pub async fn connect(url: &str, config: &StoreConfig) -> Result<Self> {
        info!("Connecting to graph database...");

        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let db = Database::connect(opts).await.map_err(|e| AppError::StoreUnavailable {
            message: format!("Failed to connect to graph database: {}", e),
        })?;

        info!("Graph database connection established");
        Ok(Self { db })
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        for ddl in SCHEMA {
            self.db.execute_unprepared(ddl).await?;
        }
        info!("Graph schema ready");
        Ok(())
    }

    async fn upsert_node<C: ConnectionTrait>(conn: &C, node: &GraphNode) -> Result<()> {
        let values: Vec<Value> = vec![
            node.session_id.into(),
            node.id.clone().into(),
            node.label.clone().into(),
            serde_json::to_value(&node.properties)?.into(),
            node.language.as_str().to_string().into(),
            node.created_at.into(),
        ];
        conn.execute(Statement::from_sql_and_values(DbBackend::Postgres, UPSERT_NODE, values))
            .await?;
        Ok(())
    }

    async fn upsert_relationship<C: ConnectionTrait>(conn: &C, rel: &GraphRelationship) -> Result<()> {
        let values: Vec<Value> = vec![
            rel.session_id.into(),
            rel.source.id.clone().into(),
            rel.source.label.clone().into(),
            rel.target.id.clone().into(),
            rel.target.label.clone().into(),
            rel.rel_type.clone().into(),
            serde_json::to_value(&rel.properties)?.into(),
            rel.language.as_str().to_string().into(),
            rel.created_at.into(),
        ];
        conn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            UPSERT_RELATIONSHIP,
            values,
        ))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn write_graph_document(&self, document: &GraphDocument) -> Result<()> {
        let txn = self.db.begin().await?;

        for node in document.nodes_with_endpoints() {
            Self::upsert_node(&txn, &node).await?;
        }
        for rel in &document.relationships {
            Self::upsert_relationship(&txn, rel).await?;
        }

        txn.commit().await?;
        debug!(
            nodes = document.node_count(),
            relationships = document.relationship_count(),
            "Graph document committed"
        );
        Ok(())
    }

    async fn create_node(&self, node: &GraphNode) -> Result<()> {
        Self::upsert_node(&self.db, node).await
    }

    async fn match_nodes(&self, query: &NodeQuery) -> Result<Vec<GraphNode>> {
        let (sql, values) = compile_node_query(query);
        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
            .await?;
        rows.iter().map(|row| node_from_row(row, "")).collect()
    }

    async fn expand(&self, session_id: SessionId, ids: &[String], limit: usize) -> Result<Vec<Expansion>> {
        if ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = SqlBuilder::default();
        let session = sql.bind(session_id);
        let id_list = ids
            .iter()
            .map(|id| sql.bind(id.clone()))
            .collect::<Vec<_>>()
            .join(", ");
        let limit = sql.bind(limit as i64);

        let text = format!(
            r#"
            SELECT r.source_id, r.source_label, r.target_id, r.target_label, r.rel_type,
                   r.properties AS rel_properties, r.language AS rel_language,
                   r.created_at AS rel_created_at,
                   n.node_id, n.label, n.properties, n.session_id, n.language, n.created_at
            FROM graph_relationships r
            JOIN graph_nodes n ON n.session_id = r.session_id AND (
                (r.source_id IN ({ids}) AND n.node_id = r.target_id AND n.label = r.target_label)
                OR (r.target_id IN ({ids}) AND n.node_id = r.source_id AND n.label = r.source_label)
            )
            WHERE r.session_id = {session}
            ORDER BY r.created_at DESC, n.node_id
            LIMIT {limit}
            "#,
            ids = id_list,
            session = session,
            limit = limit,
        );

        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, text, sql.values))
            .await?;

        rows.iter()
            .map(|row| {
                let relationship = GraphRelationship {
                    source: NodeRef::new(
                        row.try_get::<String>("", "source_id")?,
                        row.try_get::<String>("", "source_label")?,
                    ),
                    target: NodeRef::new(
                        row.try_get::<String>("", "target_id")?,
                        row.try_get::<String>("", "target_label")?,
                    ),
                    rel_type: row.try_get("", "rel_type")?,
                    properties: properties_from_json(row.try_get("", "rel_properties")?)?,
                    session_id,
                    language: parse_language(&row.try_get::<String>("", "rel_language")?)?,
                    created_at: row.try_get("", "rel_created_at")?,
                };
                Ok(Expansion {
                    relationship,
                    related: node_from_row(row, "")?,
                })
            })
            .collect()
    }

    async fn count_nodes(&self, session_id: SessionId) -> Result<Vec<NodeCount>> {
        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                SELECT label, language, COUNT(*) AS count
                FROM graph_nodes
                WHERE session_id = $1
                GROUP BY label, language
                ORDER BY label, language
                "#,
                [session_id.into()],
            ))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(NodeCount {
                    label: row.try_get("", "label")?,
                    language: parse_language(&row.try_get::<String>("", "language")?)?,
                    count: row.try_get::<i64>("", "count")?.max(0) as u64,
                })
            })
            .collect()
    }

    async fn count_relationships(&self, session_id: SessionId) -> Result<Vec<RelationshipCount>> {
        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                SELECT rel_type, language, COUNT(*) AS count
                FROM graph_relationships
                WHERE session_id = $1
                GROUP BY rel_type, language
                ORDER BY rel_type, language
                "#,
                [session_id.into()],
            ))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(RelationshipCount {
                    rel_type: row.try_get("", "rel_type")?,
                    language: parse_language(&row.try_get::<String>("", "language")?)?,
                    count: row.try_get::<i64>("", "count")?.max(0) as u64,
                })
            })
            .collect()
    }

    async fn detach_delete_session(&self, session_id: SessionId) -> Result<u64> {
        let txn = self.db.begin().await?;
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "DELETE FROM graph_relationships WHERE session_id = $1",
            [session_id.into()],
        ))
        .await?;
        let deleted = txn
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "DELETE FROM graph_nodes WHERE session_id = $1",
                [session_id.into()],
            ))
            .await?
            .rows_affected();
        txn.commit().await?;
        Ok(deleted)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn parse_language(value: &str) -> Result<Language> {
    value.parse().map_err(|e: String| AppError::store(e))
}

fn properties_from_json(value: serde_json::Value) -> Result<Properties> {
    Ok(serde_json::from_value(value)?)
}

fn node_from_row(row: &QueryResult, prefix: &str) -> Result<GraphNode> {
    let created_at: DateTime<Utc> = row.try_get(prefix, "created_at")?;
    Ok(GraphNode {
        id: row.try_get(prefix, "node_id")?,
        label: row.try_get(prefix, "label")?,
        properties: properties_from_json(row.try_get(prefix, "properties")?)?,
        session_id: row.try_get(prefix, "session_id")?,
        language: parse_language(&row.try_get::<String>(prefix, "language")?)?,
        created_at,
    })
}

/// Accumulates positional parameters while SQL text is assembled
#[derive(Default)]
struct SqlBuilder {
    values: Vec<Value>,
}

impl SqlBuilder {
    fn bind(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("${}", self.values.len())
    }

    fn field(&mut self, field: &Field) -> String {
        match field {
            Field::Id => "node_id".to_string(),
            Field::Label => "label".to_string(),
            Field::Language => "language".to_string(),
            Field::CreatedAt => "created_at::text".to_string(),
            Field::Property(key) => format!("(properties ->> {})", self.bind(key.clone())),
        }
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Eq(field, value) => {
                let f = self.field(field);
                format!("{} = {}", f, self.bind(value.clone()))
            }
            Predicate::Contains(field, needle) => {
                let f = self.field(field);
                format!("strpos(lower({}), lower({})) > 0", f, self.bind(needle.clone()))
            }
            Predicate::EqualsIgnoreCase(field, value) => {
                let f = self.field(field);
                format!("lower({}) = lower({})", f, self.bind(value.clone()))
            }
            Predicate::StartsWithIgnoreCase(field, prefix) => {
                let f = self.field(field);
                format!("starts_with(lower({}), lower({}))", f, self.bind(prefix.clone()))
            }
            Predicate::AnyPropertyContains { exclude, needle } => {
                let mut clause = String::from(
                    "EXISTS (SELECT 1 FROM jsonb_each_text(properties) AS p(key, value) WHERE ",
                );
                if !exclude.is_empty() {
                    let excluded = exclude
                        .iter()
                        .map(|k| self.bind(k.clone()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    clause.push_str(&format!("p.key NOT IN ({}) AND ", excluded));
                }
                clause.push_str(&format!(
                    "strpos(lower(p.value), lower({})) > 0)",
                    self.bind(needle.clone())
                ));
                clause
            }
            Predicate::Or(preds) => self.join(preds, " OR ", "FALSE"),
            Predicate::And(preds) => self.join(preds, " AND ", "TRUE"),
        }
    }

    fn join(&mut self, preds: &[Predicate], op: &str, empty: &str) -> String {
        if preds.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = preds.iter().map(|p| self.predicate(p)).collect();
        format!("({})", parts.join(op))
    }

    fn sort_key(&mut self, key: &SortKey) -> String {
        match key {
            SortKey::FirstMatching(preds) => {
                let mut case = String::from("CASE");
                for (i, pred) in preds.iter().enumerate() {
                    let cond = self.predicate(pred);
                    case.push_str(&format!(" WHEN {} THEN {}", cond, i + 1));
                }
                case.push_str(&format!(" ELSE {} END ASC", preds.len() + 1));
                case
            }
            SortKey::Desc(Field::CreatedAt) => "created_at DESC".to_string(),
            SortKey::Desc(field) => format!("{} DESC NULLS LAST", self.field(field)),
            SortKey::AscNumeric(field) => {
                let f = self.field(field);
                format!(
                    "CASE WHEN {f} ~ '^-?[0-9]+$' THEN ({f})::bigint END ASC NULLS LAST",
                    f = f
                )
            }
        }
    }
}

/// Compile a node query into SQL text and positional values
fn compile_node_query(query: &NodeQuery) -> (String, Vec<Value>) {
    let mut sql = SqlBuilder::default();
    let mut text = format!(
        "SELECT {} FROM graph_nodes WHERE session_id = {}",
        NODE_COLUMNS,
        sql.bind(query.session_id())
    );

    if let Some(label) = query.label_filter() {
        let param = sql.bind(label.to_string());
        text.push_str(&format!(" AND label = {}", param));
    }

    for predicate in query.filters() {
        let clause = sql.predicate(predicate);
        text.push_str(&format!(" AND {}", clause));
    }

    let mut order: Vec<String> = query.sort_keys().iter().map(|k| sql.sort_key(k)).collect();
    order.push("node_id ASC".to_string());
    text.push_str(&format!(" ORDER BY {}", order.join(", ")));

    if let Some(limit) = query.max_results() {
        let param = sql.bind(limit as i64);
        text.push_str(&format!(" LIMIT {}", param));
    }

    (text, sql.values)
}
