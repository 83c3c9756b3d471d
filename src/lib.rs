//! # qail-synth: Shape-Driven SQL Synthesis
//!
//! > **Describe the query. Get the SQL.**
//!
//! qail-synth builds syntactically varied `SELECT` queries from a
//! declarative [`Specification`](spec::Specification) and a relational schema.
//!
//! ## Quick Example
//!
//! ```rust
//! use qail_synth::prelude::*;
//!
//! let schema = SchemaContext::builder("shop")
//!     .table("item", &[("id", ColumnType::Number), ("price", ColumnType::Number)])
//!     .primary_key("item", "id")
//!     .build()?;
//!
//! let spec = Specification {
//!     select: SelectShape::Slots(vec![SlotKind::Column(Some(ColumnType::Number))]),
//!     ..Specification::default()
//! };
//!
//! let generator = QueryGenerator::new(&schema, Vec::new());
//! let mut rng = seeded(7);
//! let queries = generator.generate_spec(&mut rng, &spec, true)?;
//! assert_eq!(queries, vec!["SELECT price FROM item"]);
//! # Ok::<(), qail_synth::error::SynthError>(())
//! ```
//!
//! ## Pipeline
//!
//! | Stage            | Module                        |
//! |------------------|-------------------------------|
//! | FROM             | [`clauses::table_expr`]       |
//! | WHERE            | [`clauses::where_clause`]     |
//! | GROUP BY         | [`clauses::group_by`]         |
//! | HAVING           | [`clauses::having`]           |
//! | SELECT           | [`clauses::select`]           |
//! | ORDER BY / LIMIT | [`clauses::order_by`], [`clauses::limit`] |
//!
//! WHERE predicates, SELECT slots and FROM sources may nest a complete query,
//! bounded by the specification's depth budget.

pub mod clauses;
pub mod config;
pub mod error;
pub mod generator;
pub mod join;
pub mod output;
pub mod random;
pub mod schema;
pub mod spec;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::generator::{GeneratedQueries, QueryGenerator, QueryOrchestrator};
    pub use crate::join::{JoinGraph, JoinKind, max_join_arity};
    pub use crate::random::seeded;
    pub use crate::schema::{ColumnType, SchemaCatalog, SchemaContext};
    pub use crate::spec::{
        AggFunc, DepthBudget, HavingShape, LimitMode, OrderByMode, QuerySpec, SelectShape, SlotKind,
        SpecConfig, SpecExpander, SpecSet, Specification, TableExprShape, WhereShape,
    };
}

/// Generate every query of a specification file for one database.
///
/// Specifications that fail with a defect are listed in
/// [`output::Synthesis::failed`]; the others still produce rows.
///
/// # Example
///
/// ```rust,ignore
/// let synthesis = qail_synth::synthesize(&schema, &specs, 7, false);
/// assert!(synthesis.failed.is_empty());
/// ```
pub fn synthesize(
    schema: &schema::SchemaContext,
    specs: &spec::SpecSet,
    seed: u64,
    random_choice: bool,
) -> output::Synthesis {
    let generator = generator::QueryGenerator::new(schema, specs.pool());
    let mut rng = random::seeded(seed);
    let generated = generator.generate_all(&mut rng, specs, random_choice);
    output::Synthesis {
        rows: output::rows(specs, &generated),
        failed: generated.failed,
    }
}
