//! Query orchestrator.
//!
//! Runs the clause stages in order and fans out over every candidate each
//! stage returns. Stages that need a nested query call back into the
//! orchestrator through [`QueryOrchestrator`].

use crate::clauses::select::SelectOptions;
use crate::clauses::{
    AttributeUniverse, PartialQuery, StageContext, TableRef, group_by, having, limit, order_by,
    select, table_expr, where_clause,
};
use crate::error::{SynthError, SynthResult};
use crate::join::JoinGraph;
use crate::schema::{ColumnType, SchemaContext};
use crate::spec::{AggFunc, DepthBudget, QuerySpec, SpecSet, Specification};
use rand::RngCore;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

/// An item an enclosing clause needs the inner SELECT list to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDemand {
    /// Projected as written, e.g. `*` or `1`.
    Verbatim(String),
    /// A column named `column` in the inner universe, optionally aggregated.
    Resolve {
        column: String,
        aggregate: Option<AggFunc>,
    },
}

impl ColumnDemand {
    fn resolve(&self, universe: &AttributeUniverse) -> SynthResult<String> {
        match self {
            ColumnDemand::Verbatim(item) => Ok(item.clone()),
            ColumnDemand::Resolve { column, aggregate } => {
                let reference = universe.resolve(column).ok_or_else(|| {
                    SynthError::infeasible("SELECT", format!("column {} is not in scope", column))
                })?;
                Ok(match aggregate {
                    Some(agg) => agg.apply(&reference),
                    None => reference,
                })
            }
        }
    }
}

/// Equality an inner query adds to its WHERE clause to refer to the outer one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Fully qualified outer column.
    pub outer: String,
    /// Bare inner column, resolved against the inner universe.
    pub inner_column: String,
}

/// One call into the pipeline.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub spec: Specification,
    pub must_select: Vec<ColumnDemand>,
    pub correlation: Option<Correlation>,
    /// Project only `must_select`.
    pub is_subquery: bool,
    pub random_choice: bool,
}

impl GenerationRequest {
    pub fn top_level(spec: Specification, random_choice: bool) -> Self {
        Self {
            spec,
            must_select: Vec::new(),
            correlation: None,
            is_subquery: false,
            random_choice,
        }
    }

    /// A nested query. Nested queries are always single-sample.
    pub fn nested(spec: Specification, is_subquery: bool) -> Self {
        Self {
            is_subquery,
            ..Self::top_level(spec, true)
        }
    }
}

/// A finished query and what an enclosing query may know about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub sql: String,
    pub fields: Vec<String>,
    pub alias_types: BTreeMap<String, ColumnType>,
    pub universe: AttributeUniverse,
    pub table_ref: TableRef,
}

/// Entry point stages re-enter for nested queries.
pub trait QueryOrchestrator {
    fn generate(&self, rng: &mut dyn RngCore, request: &GenerationRequest) -> SynthResult<Vec<Completion>>;
}

/// Skip a failed branch on recoverable errors, or the whole specification in
/// single-sample mode.
macro_rules! recover {
    ($result:expr, $random:expr, $label:lifetime) => {
        match $result {
            Ok(value) => value,
            Err(e) if e.is_recoverable() => {
                tracing::debug!(error = %e, "branch skipped");
                if $random {
                    break $label;
                }
                continue;
            }
            Err(e) => return Err(e),
        }
    };
}

/// Pipeline over one schema.
pub struct QueryGenerator<'s> {
    schema: &'s SchemaContext,
    graph: JoinGraph,
    pool: Vec<Specification>,
}

impl<'s> QueryGenerator<'s> {
    /// `pool` holds the templates nested queries are drawn from.
    pub fn new(schema: &'s SchemaContext, pool: Vec<Specification>) -> Self {
        Self {
            schema,
            graph: JoinGraph::from_schema(schema),
            pool,
        }
    }

    pub fn schema(&self) -> &SchemaContext {
        self.schema
    }

    pub fn graph(&self) -> &JoinGraph {
        &self.graph
    }

    pub(crate) fn stage_context(&self, random_choice: bool, depth: DepthBudget) -> StageContext<'_> {
        StageContext {
            schema: self.schema,
            graph: &self.graph,
            pool: &self.pool,
            orchestrator: self,
            random_choice,
            depth,
        }
    }

    /// Every query text one specification expands to.
    pub fn generate_spec(
        &self,
        rng: &mut dyn RngCore,
        spec: &Specification,
        random_choice: bool,
    ) -> SynthResult<Vec<String>> {
        let request = GenerationRequest::top_level(spec.clone(), random_choice);
        Ok(self.generate(rng, &request)?.into_iter().map(|c| c.sql).collect())
    }

    /// Like [`generate_spec`](Self::generate_spec), combining the two sides
    /// of a set operation.
    pub fn generate_query_spec(
        &self,
        rng: &mut dyn RngCore,
        spec: &QuerySpec,
        random_choice: bool,
    ) -> SynthResult<Vec<String>> {
        match spec {
            QuerySpec::Single(spec) => self.generate_spec(rng, spec, random_choice),
            QuerySpec::Compound { op, first, second } => {
                let first = self.generate_spec(rng, first, true)?;
                let second = self.generate_spec(rng, second, true)?;
                Ok(match (first.first(), second.first()) {
                    (Some(l), Some(r)) => vec![format!("({}) {} ({})", l, op.keyword(), r)],
                    _ => Vec::new(),
                })
            }
        }
    }

    /// Queries for every entry of `specs`, keyed like the entries.
    ///
    /// A specification that fails with a defect is recorded in
    /// [`GeneratedQueries::failed`] and the remaining ones still run.
    pub fn generate_all(
        &self,
        rng: &mut dyn RngCore,
        specs: &SpecSet,
        random_choice: bool,
    ) -> GeneratedQueries {
        let mut out = GeneratedQueries {
            db_id: specs.db_id.clone(),
            ..GeneratedQueries::default()
        };
        for (key, spec) in &specs.specs {
            match self.generate_query_spec(rng, spec, random_choice) {
                Ok(queries) => {
                    tracing::info!(spec = %key, count = queries.len(), "generated");
                    if !queries.is_empty() {
                        out.queries.insert(key.clone(), queries);
                    }
                }
                Err(e) => {
                    tracing::warn!(spec = %key, error = %e, "specification failed");
                    out.failed.insert(key.clone(), e.to_string());
                }
            }
        }
        out
    }
}

impl QueryOrchestrator for QueryGenerator<'_> {
    fn generate(&self, rng: &mut dyn RngCore, request: &GenerationRequest) -> SynthResult<Vec<Completion>> {
        let spec = &request.spec;
        let random = request.random_choice;
        let ctx = self.stage_context(random, spec.depth);

        let mut tables =
            match table_expr::build_table_expression(&ctx, &spec.table_exp, spec.meaningful_joins, rng) {
                Ok(tables) => tables,
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(error = %e, "no table expression");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            };
        tables.shuffle(rng);

        let options = SelectOptions {
            shape: &spec.select,
            distinct: spec.distinct,
            is_subquery: request.is_subquery,
            has_group_by: spec.group_by_columns > 0,
        };
        let mut completions: Vec<Completion> = Vec::new();
        'spec: for table in &tables {
            let forced = recover!(
                request
                    .must_select
                    .iter()
                    .map(|d| d.resolve(&table.universe))
                    .collect::<SynthResult<Vec<_>>>(),
                random,
                'spec
            );
            let base = PartialQuery {
                text: table.from_text.clone(),
                universe: table.universe.clone(),
                forced,
            };
            let filtered = recover!(
                where_clause::complete_with_where(
                    &ctx,
                    &base,
                    &spec.where_shape,
                    &table.table_ref,
                    request.correlation.as_ref(),
                    rng,
                ),
                random,
                'spec
            );
            for partial in &filtered {
                let grouped = recover!(
                    group_by::build_group_by(&ctx, partial, &table.table_ref, spec.group_by_columns, rng),
                    random,
                    'spec
                );
                for partial in &grouped {
                    let having = recover!(having::build_having(&ctx, partial, &spec.having, rng), random, 'spec);
                    for partial in &having {
                        let projections = recover!(
                            select::build_select(&ctx, partial, &table.table_ref, options, rng),
                            random,
                            'spec
                        );
                        for projection in &projections {
                            let order = recover!(order_by::build_order_by(projection, spec.order_by, rng), random, 'spec);
                            let limit = limit::build_limit(spec.limit, rng);
                            completions.push(Completion {
                                sql: format!("{}{}{}{}", projection.text, partial.text, order, limit),
                                fields: projection.fields.clone(),
                                alias_types: projection.alias_types.clone(),
                                universe: partial.universe.clone(),
                                table_ref: table.table_ref.clone(),
                            });
                        }
                    }
                }
            }
        }

        let mut seen = Vec::with_capacity(completions.len());
        completions.retain(|c| {
            if seen.contains(&c.sql) {
                false
            } else {
                seen.push(c.sql.clone());
                true
            }
        });
        tracing::debug!(count = completions.len(), subquery = request.is_subquery, "completions");
        Ok(completions)
    }
}

/// Generated query texts of one database, keyed by specification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedQueries {
    pub db_id: String,
    pub queries: BTreeMap<String, Vec<String>>,
    /// Specifications that hit a defect, with the error message.
    pub failed: BTreeMap<String, String>,
}

impl GeneratedQueries {
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Total number of query texts.
    pub fn total(&self) -> usize {
        self.queries.values().map(Vec::len).sum()
    }

    /// The queries of one specification, one per line.
    pub fn joined(&self, key: &str) -> Option<String> {
        self.queries.get(key).map(|q| q.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;
    use crate::schema::ColumnType::{Number, Text};
    use crate::spec::{
        HavingShape, LimitMode, OrderByMode, SelectShape, SetOp, SlotKind, SubqueryKind, TableExprShape,
        WhereShape,
    };

    fn schema() -> SchemaContext {
        SchemaContext::builder("db")
            .table("t", &[("id", Number), ("a", Number), ("b", Text)])
            .primary_key("t", "id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_demand() {
        let universe = AttributeUniverse {
            number: vec!["x.a".into()],
            text: Vec::new(),
        };
        let demand = ColumnDemand::Resolve {
            column: "a".into(),
            aggregate: Some(AggFunc::Avg),
        };
        assert_eq!(demand.resolve(&universe).unwrap(), "AVG(x.a)");
        let missing = ColumnDemand::Resolve {
            column: "b".into(),
            aggregate: None,
        };
        assert!(missing.resolve(&universe).unwrap_err().is_recoverable());
    }

    #[test]
    fn test_full_pipeline_order() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let spec = Specification {
            table_exp: TableExprShape::SingleTable(Some("t".into())),
            where_shape: WhereShape::Between,
            order_by: OrderByMode::NumberAsc,
            limit: LimitMode::WithoutOffset,
            select: SelectShape::Slots(vec![SlotKind::Column(Some(Number))]),
            ..Specification::default()
        };
        let mut rng = seeded(101);
        let queries = generator.generate_spec(&mut rng, &spec, true).unwrap();
        assert_eq!(queries.len(), 1);
        assert!(
            queries[0].starts_with("SELECT a FROM t WHERE ") && queries[0].contains(" BETWEEN 1 AND 10 ORDER BY 1 ASC LIMIT "),
            "{}",
            queries[0]
        );
    }

    #[test]
    fn test_infeasible_branches_are_dropped() {
        let schema = SchemaContext::builder("db")
            .table("n", &[("id", Number)])
            .primary_key("n", "id")
            .build()
            .unwrap();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let spec = Specification {
            where_shape: WhereShape::PatternMatching(None, None),
            ..Specification::default()
        };
        let mut rng = seeded(102);
        assert!(generator.generate_spec(&mut rng, &spec, false).unwrap().is_empty());
    }

    #[test]
    fn test_subquery_without_budget_surfaces() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let spec = Specification {
            where_shape: WhereShape::Subquery(SubqueryKind::In),
            ..Specification::default()
        };
        let mut rng = seeded(103);
        let err = generator.generate_spec(&mut rng, &spec, true).unwrap_err();
        assert!(matches!(err, SynthError::DepthBudget(_)));
    }

    #[test]
    fn test_set_operation() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let spec = QuerySpec::Compound {
            op: SetOp::Except,
            first: Specification::default(),
            second: Specification {
                having: HavingShape::None,
                ..Specification::default()
            },
        };
        let mut rng = seeded(104);
        let queries = generator.generate_query_spec(&mut rng, &spec, false).unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].starts_with("(SELECT "));
        assert!(queries[0].contains(") EXCEPT (SELECT "));
    }

    #[test]
    fn test_defective_spec_does_not_stop_the_set() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let mut specs = SpecSet::new("db");
        let defective = Specification {
            where_shape: WhereShape::Subquery(SubqueryKind::In),
            ..Specification::default()
        };
        let defective_key = QuerySpec::from(defective.clone()).content_hash();
        specs.insert(defective.into());
        specs.insert(Specification::default().into());
        let mut rng = seeded(106);
        let generated = generator.generate_all(&mut rng, &specs, false);
        assert_eq!(generated.len(), 1);
        assert_eq!(generated.failed.len(), 1);
        let message = generated.failed.get(&defective_key).unwrap();
        assert!(message.starts_with("Depth budget violation"), "{}", message);
    }

    #[test]
    fn test_completions_are_unique() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let spec = Specification {
            select: SelectShape::Star,
            ..Specification::default()
        };
        let mut rng = seeded(105);
        let queries = generator.generate_spec(&mut rng, &spec, false).unwrap();
        assert_eq!(queries, vec!["SELECT * FROM t"]);
    }
}
