//! Clause stages of the composition pipeline.
//!
//! Each stage takes the [`PartialQuery`] built so far and returns the list of
//! candidate continuations. Stages never mutate their input; the orchestrator
//! fans out over every candidate.

pub mod expr;
pub mod group_by;
pub mod having;
pub mod limit;
pub mod order_by;
pub mod select;
pub mod subquery;
pub mod table_expr;
pub mod where_clause;

use crate::error::{SynthError, SynthResult};
use crate::generator::QueryOrchestrator;
use crate::join::JoinGraph;
use crate::schema::{ColumnType, SchemaContext};
use crate::spec::{DepthBudget, Specification};

/// What every stage of one query can see.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub schema: &'a SchemaContext,
    pub graph: &'a JoinGraph,
    /// Templates for nested queries.
    pub pool: &'a [Specification],
    pub orchestrator: &'a dyn QueryOrchestrator,
    pub random_choice: bool,
    /// Budget of the query being built.
    pub depth: DepthBudget,
}

/// Typed column references visible at a point of the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeUniverse {
    pub number: Vec<String>,
    pub text: Vec<String>,
}

impl AttributeUniverse {
    /// Add a reference. Columns of other types are not tracked.
    pub fn push(&mut self, ty: ColumnType, reference: String) {
        match ty {
            ColumnType::Number => self.number.push(reference),
            ColumnType::Text => self.text.push(reference),
            ColumnType::Other => {}
        }
    }

    /// Numeric references first, then textual ones.
    pub fn all(&self) -> Vec<String> {
        self.number.iter().chain(&self.text).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.number.is_empty() && self.text.is_empty()
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.number.iter().chain(&self.text).any(|c| c == reference)
    }

    pub fn pool(&self, ty: ColumnType) -> &[String] {
        match ty {
            ColumnType::Number => &self.number,
            ColumnType::Text => &self.text,
            ColumnType::Other => &[],
        }
    }

    pub fn type_of(&self, reference: &str) -> Option<ColumnType> {
        if self.number.iter().any(|c| c == reference) {
            Some(ColumnType::Number)
        } else if self.text.iter().any(|c| c == reference) {
            Some(ColumnType::Text)
        } else {
            None
        }
    }

    /// The reference naming column `bare`, qualified or not.
    pub fn resolve(&self, bare: &str) -> Option<String> {
        let suffix = format!(".{}", bare);
        self.number
            .iter()
            .chain(&self.text)
            .find(|c| *c == bare || c.ends_with(&suffix))
            .cloned()
    }
}

/// Strip any qualifier from a column reference.
pub fn bare_name(reference: &str) -> &str {
    reference.rsplit('.').next().unwrap_or(reference)
}

/// How the FROM clause names its sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    /// Bare table names.
    Tables(Vec<String>),
    /// `table AS alias`.
    Aliased { alias: String, table: String },
    /// `(subquery) AS alias` over these underlying tables.
    Derived { alias: String, tables: Vec<String> },
}

impl TableRef {
    /// Underlying schema tables.
    pub fn tables(&self) -> Vec<&str> {
        match self {
            TableRef::Tables(tables) | TableRef::Derived { tables, .. } => {
                tables.iter().map(String::as_str).collect()
            }
            TableRef::Aliased { table, .. } => vec![table.as_str()],
        }
    }

    /// How an enclosed subquery refers to `table`, if it can.
    pub fn qualifier_for(&self, table: &str) -> Option<&str> {
        match self {
            TableRef::Tables(tables) => tables.iter().find(|t| *t == table).map(String::as_str),
            TableRef::Aliased { alias, table: t } if t == table => Some(alias.as_str()),
            TableRef::Derived { alias, tables } if tables.iter().any(|t| t == table) => {
                Some(alias.as_str())
            }
            _ => None,
        }
    }

    /// Every spelling of the primary keys in scope.
    pub fn key_columns(&self, schema: &SchemaContext) -> Vec<String> {
        let mut keys = Vec::new();
        for table in self.tables() {
            let Some(pk) = schema.primary_key(table) else {
                continue;
            };
            match self {
                TableRef::Tables(_) => {
                    keys.push(pk.to_string());
                    keys.push(format!("{}.{}", table, pk));
                }
                TableRef::Aliased { alias, .. } => {
                    keys.push(pk.to_string());
                    keys.push(format!("{}.{}", table, pk));
                    keys.push(format!("{}.{}", alias, pk));
                }
                TableRef::Derived { alias, .. } => keys.push(format!("{}.{}", alias, pk)),
            }
        }
        keys
    }
}

/// Query text after the SELECT list, plus what later clauses must honour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialQuery {
    pub text: String,
    pub universe: AttributeUniverse,
    /// Items the SELECT list must repeat verbatim.
    pub forced: Vec<String>,
}

impl PartialQuery {
    pub fn new(text: impl Into<String>, universe: AttributeUniverse) -> Self {
        Self {
            text: text.into(),
            universe,
            forced: Vec::new(),
        }
    }

    /// A copy with `suffix` appended.
    pub fn extend(&self, suffix: &str) -> Self {
        Self {
            text: format!("{}{}", self.text, suffix),
            universe: self.universe.clone(),
            forced: self.forced.clone(),
        }
    }

    /// A copy with `suffix` appended and `columns` added to the forced set.
    pub fn extend_forced(&self, suffix: &str, columns: &[String]) -> Self {
        let mut next = self.extend(suffix);
        next.forced.extend(columns.iter().cloned());
        next
    }
}

/// Pick a column of `pool`, failing the stage when there is none.
pub(crate) fn require<'p>(
    pool: &'p [String],
    stage: &'static str,
    what: &str,
    rng: &mut dyn rand::RngCore,
) -> SynthResult<&'p String> {
    crate::random::pick(pool, rng)
        .ok_or_else(|| SynthError::infeasible(stage, format!("no {} column available", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType::{Number, Text};

    #[test]
    fn test_universe_resolve() {
        let mut universe = AttributeUniverse::default();
        universe.push(Number, "city.id".into());
        universe.push(Text, "name".into());
        universe.push(Number, "grid".into());
        universe.push(ColumnType::Other, "founded".into());
        assert_eq!(universe.resolve("id").as_deref(), Some("city.id"));
        assert_eq!(universe.resolve("name").as_deref(), Some("name"));
        // `grid` ends with `rid` but is a different column.
        assert_eq!(universe.resolve("rid"), None);
        assert_eq!(universe.type_of("grid"), Some(Number));
        assert!(!universe.contains("founded"));
    }

    #[test]
    fn test_key_columns() {
        let schema = SchemaContext::builder("db")
            .table("t", &[("id", Number), ("a", Number)])
            .primary_key("t", "id")
            .build()
            .unwrap();
        let aliased = TableRef::Aliased {
            alias: "x".into(),
            table: "t".into(),
        };
        assert_eq!(aliased.key_columns(&schema), vec!["id", "t.id", "x.id"]);
        let derived = TableRef::Derived {
            alias: "q".into(),
            tables: vec!["t".into()],
        };
        assert_eq!(derived.key_columns(&schema), vec!["q.id"]);
        assert_eq!(aliased.qualifier_for("t"), Some("x"));
        assert_eq!(aliased.qualifier_for("u"), None);
    }

    #[test]
    fn test_partial_query_is_not_mutated() {
        let base = PartialQuery::new(" FROM t", AttributeUniverse::default());
        let next = base.extend_forced(" GROUP BY b", &["b".to_string()]);
        assert_eq!(base.text, " FROM t");
        assert!(base.forced.is_empty());
        assert_eq!(next.text, " FROM t GROUP BY b");
        assert_eq!(next.forced, vec!["b"]);
    }

    #[test]
    fn test_bare_name() {
        assert_eq!(bare_name("x.col"), "col");
        assert_eq!(bare_name("col"), "col");
    }
}
