//! Schema adapter.
//!
//! Exposes the relational schema the generator draws from: tables and their
//! ordered columns, column types, primary keys and foreign keys. A
//! [`SchemaCatalog`] can be read from a Spider-style `tables.json`; tests and
//! embedders build a [`SchemaContext`] directly with [`SchemaBuilder`].

use crate::error::{SynthError, SynthResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Coarse column type used to route columns into expression pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Text,
    /// Anything else (time, boolean, blobs). Never enters an attribute universe.
    Other,
}

impl ColumnType {
    /// Map a schema type tag (`number`, `text`, `time`, ...) to a column type.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "number" | "int" | "integer" | "real" | "float" | "double" | "numeric" => {
                ColumnType::Number
            }
            "text" | "varchar" | "char" | "string" => ColumnType::Text,
            _ => ColumnType::Other,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Number => write!(f, "number"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Other => write!(f, "other"),
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

/// A table definition with its columns in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One foreign-key relationship, seen from the table that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub remote_table: String,
    pub remote_column: String,
}

/// Immutable schema of one database, shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaContext {
    db_id: String,
    tables: Vec<TableDef>,
    primary_keys: BTreeMap<String, String>,
    foreign_keys: Vec<(String, Vec<ForeignKey>)>,
}

impl SchemaContext {
    /// Start building a schema for the given database id.
    pub fn builder(db_id: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            db_id: db_id.into(),
            tables: Vec::new(),
            primary_keys: BTreeMap::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn db_id(&self) -> &str {
        &self.db_id
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn table(&self, name: &str) -> SynthResult<&TableDef> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| SynthError::Schema(format!("unknown table '{}'", name)))
    }

    /// Type of `table.column`, if both exist.
    pub fn column_type(&self, table: &str, column: &str) -> Option<ColumnType> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .and_then(|t| t.column(column))
            .map(|c| c.ty)
    }

    pub fn primary_key(&self, table: &str) -> Option<&str> {
        self.primary_keys.get(table).map(String::as_str)
    }

    /// Foreign keys grouped by owning table, in construction order.
    pub fn foreign_keys(&self) -> &[(String, Vec<ForeignKey>)] {
        &self.foreign_keys
    }

    /// Tables declaring a column with this bare name, in declaration order.
    pub fn tables_with_column(&self, column: &str) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.column(column).is_some())
            .map(|t| t.name.as_str())
            .collect()
    }
}

/// Builder for [`SchemaContext`].
#[derive(Debug)]
pub struct SchemaBuilder {
    db_id: String,
    tables: Vec<TableDef>,
    primary_keys: BTreeMap<String, String>,
    foreign_keys: Vec<(String, Vec<ForeignKey>)>,
}

impl SchemaBuilder {
    /// Add a table with `(column, type)` pairs.
    pub fn table(mut self, name: &str, columns: &[(&str, ColumnType)]) -> Self {
        self.tables.push(TableDef {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(c, ty)| ColumnDef {
                    name: c.to_string(),
                    ty: *ty,
                })
                .collect(),
        });
        self
    }

    pub fn primary_key(mut self, table: &str, column: &str) -> Self {
        self.primary_keys.insert(table.to_string(), column.to_string());
        self
    }

    /// Declare `table.column` referencing `remote_table.remote_column`.
    pub fn foreign_key(
        mut self,
        table: &str,
        column: &str,
        remote_table: &str,
        remote_column: &str,
    ) -> Self {
        let fk = ForeignKey {
            column: column.to_string(),
            remote_table: remote_table.to_string(),
            remote_column: remote_column.to_string(),
        };
        match self.foreign_keys.iter_mut().find(|(t, _)| t == table) {
            Some((_, fks)) => fks.push(fk),
            None => self.foreign_keys.push((table.to_string(), vec![fk])),
        }
        self
    }

    /// Validate every key reference and freeze the schema.
    pub fn build(self) -> SynthResult<SchemaContext> {
        let has_column = |table: &str, column: &str| {
            self.tables
                .iter()
                .any(|t| t.name == table && t.column(column).is_some())
        };
        for (table, column) in &self.primary_keys {
            if !has_column(table, column) {
                return Err(SynthError::Schema(format!(
                    "primary key {}.{} does not exist",
                    table, column
                )));
            }
        }
        for (table, fks) in &self.foreign_keys {
            for fk in fks {
                if !has_column(table, &fk.column) || !has_column(&fk.remote_table, &fk.remote_column)
                {
                    return Err(SynthError::Schema(format!(
                        "foreign key {}.{} -> {}.{} references a missing column",
                        table, fk.column, fk.remote_table, fk.remote_column
                    )));
                }
            }
        }
        Ok(SchemaContext {
            db_id: self.db_id,
            tables: self.tables,
            primary_keys: self.primary_keys,
            foreign_keys: self.foreign_keys,
        })
    }
}

// ============================================================================
// Spider tables.json ingestion
// ============================================================================

#[derive(Debug, Deserialize)]
struct SpiderDatabase {
    db_id: String,
    table_names_original: Vec<String>,
    column_names_original: Vec<(i64, String)>,
    column_types: Vec<String>,
    #[serde(default)]
    primary_keys: Vec<PrimaryKeyEntry>,
    #[serde(default)]
    foreign_keys: Vec<(usize, usize)>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrimaryKeyEntry {
    Single(usize),
    Composite(Vec<usize>),
}

/// All databases described by one table-definition file.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    databases: BTreeMap<String, SchemaContext>,
}

impl SchemaCatalog {
    pub fn from_tables_json_file(path: impl AsRef<Path>) -> SynthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynthError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_tables_json(&content)
    }

    pub fn from_tables_json(content: &str) -> SynthResult<Self> {
        let raw: Vec<SpiderDatabase> = serde_json::from_str(content)?;
        let mut databases = BTreeMap::new();
        for db in raw {
            let schema = convert_database(db)?;
            databases.insert(schema.db_id.clone(), schema);
        }
        Ok(Self { databases })
    }

    pub fn get(&self, db_id: &str) -> SynthResult<&SchemaContext> {
        self.databases
            .get(db_id)
            .ok_or_else(|| SynthError::Schema(format!("database '{}' not found", db_id)))
    }

    pub fn db_ids(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }
}

fn convert_database(db: SpiderDatabase) -> SynthResult<SchemaContext> {
    if db.column_types.len() != db.column_names_original.len() {
        return Err(SynthError::Schema(format!(
            "{}: {} column types for {} columns",
            db.db_id,
            db.column_types.len(),
            db.column_names_original.len()
        )));
    }

    let mut tables: Vec<TableDef> = db
        .table_names_original
        .iter()
        .map(|name| TableDef {
            name: name.clone(),
            columns: Vec::new(),
        })
        .collect();

    // (table name, column name) per global column index; index 0 is `*`.
    let mut owners: Vec<Option<(String, String)>> = Vec::with_capacity(db.column_names_original.len());
    for ((table_index, column), tag) in db.column_names_original.iter().zip(&db.column_types) {
        let Ok(idx) = usize::try_from(*table_index) else {
            owners.push(None);
            continue;
        };
        let table = tables.get_mut(idx).ok_or_else(|| {
            SynthError::Schema(format!("{}: table index {} out of range", db.db_id, idx))
        })?;
        table.columns.push(ColumnDef {
            name: column.clone(),
            ty: ColumnType::from_tag(tag),
        });
        owners.push(Some((table.name.clone(), column.clone())));
    }

    let owner = |index: usize| -> SynthResult<&(String, String)> {
        owners
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| SynthError::Schema(format!("{}: bad column index {}", db.db_id, index)))
    };

    let mut primary_keys = BTreeMap::new();
    for entry in &db.primary_keys {
        let index = match entry {
            PrimaryKeyEntry::Single(i) => *i,
            PrimaryKeyEntry::Composite(cols) => match cols.first() {
                Some(i) => *i,
                None => continue,
            },
        };
        let (table, column) = owner(index)?;
        primary_keys
            .entry(table.clone())
            .or_insert_with(|| column.clone());
    }

    let mut pairs = Vec::with_capacity(db.foreign_keys.len());
    for (local, remote) in &db.foreign_keys {
        let (t1, c1) = owner(*local)?;
        let (t2, c2) = owner(*remote)?;
        pairs.push((t1.clone(), c1.clone(), t2.clone(), c2.clone()));
    }

    Ok(SchemaContext {
        db_id: db.db_id,
        tables,
        primary_keys,
        foreign_keys: fold_foreign_keys(pairs),
    })
}

/// Attach each FK pair to the most connected table taking part in it.
///
/// Tables are visited in descending order of how many pairs mention them
/// (ties keep first-seen order). A pair is oriented from the visiting table
/// and consumed, so each relationship yields exactly one edge.
fn fold_foreign_keys(mut pairs: Vec<(String, String, String, String)>) -> Vec<(String, Vec<ForeignKey>)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for (t1, _, t2, _) in &pairs {
        for t in [t1, t2] {
            match counts.iter_mut().find(|(name, _)| name == t) {
                Some((_, n)) => *n += 1,
                None => counts.push((t.clone(), 1)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let mut folded = Vec::new();
    for (table, _) in counts {
        let mut fks = Vec::new();
        pairs.retain(|(t1, c1, t2, c2)| {
            if *t1 == table {
                fks.push(ForeignKey {
                    column: c1.clone(),
                    remote_table: t2.clone(),
                    remote_column: c2.clone(),
                });
                false
            } else if *t2 == table {
                fks.push(ForeignKey {
                    column: c2.clone(),
                    remote_table: t1.clone(),
                    remote_column: c1.clone(),
                });
                false
            } else {
                true
            }
        });
        folded.push((table, fks));
    }
    folded
}
