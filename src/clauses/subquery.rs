//! Subquery predicates of the WHERE stage.
//!
//! Each predicate re-enters the orchestrator for a single inner query whose
//! projection is dictated by the predicate form.

use super::{AttributeUniverse, StageContext, TableRef, bare_name, require};
use crate::error::{SynthError, SynthResult};
use crate::generator::{ColumnDemand, Correlation, GenerationRequest};
use crate::random;
use crate::schema::ColumnType;
use crate::spec::{AggFunc, CmpOp, Specification, SubqueryKind, sampler};
use rand::RngCore;

const QUANTIFIERS: [&str; 2] = ["ANY", "ALL"];

pub fn build_subquery_predicate(
    ctx: &StageContext<'_>,
    kind: SubqueryKind,
    universe: &AttributeUniverse,
    table_ref: &TableRef,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    match kind {
        SubqueryKind::In => membership(ctx, "IN", universe, rng),
        SubqueryKind::NotIn => membership(ctx, "NOT IN", universe, rng),
        SubqueryKind::Comparison => comparison(ctx, universe, rng),
        SubqueryKind::Exists => exists(ctx, "EXISTS", universe, table_ref, rng),
        SubqueryKind::NotExists => exists(ctx, "NOT EXISTS", universe, table_ref, rng),
    }
}

/// `ANY`, `ALL` or nothing, each with equal weight for the two quantifiers.
fn quantifier(rng: &mut dyn RngCore) -> Option<&'static str> {
    if random::coin(rng) {
        None
    } else {
        random::pick(&QUANTIFIERS, rng).copied()
    }
}

fn prefixed(quantifier: Option<&str>) -> String {
    quantifier.map(|q| format!("{} ", q)).unwrap_or_default()
}

/// Tables that have a column named like `reference`.
fn hosts(ctx: &StageContext<'_>, reference: &str) -> Vec<String> {
    ctx.schema
        .tables_with_column(bare_name(reference))
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn inner_sql(
    ctx: &StageContext<'_>,
    spec: Specification,
    demand: ColumnDemand,
    correlation: Option<Correlation>,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    let request = GenerationRequest {
        must_select: vec![demand],
        correlation,
        ..GenerationRequest::nested(spec, true)
    };
    ctx.orchestrator
        .generate(rng, &request)?
        .into_iter()
        .next()
        .map(|c| c.sql)
        .ok_or_else(|| SynthError::infeasible("WHERE", "inner query produced no completion"))
}

fn membership(
    ctx: &StageContext<'_>,
    keyword: &str,
    universe: &AttributeUniverse,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    let column = require(&universe.all(), "WHERE", "any", rng)?.clone();
    let spec = sampler::predicate_spec(ctx.pool, &hosts(ctx, &column), false, ctx.depth, rng)?;
    let demand = ColumnDemand::Resolve {
        column: bare_name(&column).to_string(),
        aggregate: None,
    };
    let sql = inner_sql(ctx, spec, demand, None, rng)?;
    Ok(format!("{} {} {}({})", column, keyword, prefixed(quantifier(rng)), sql))
}

fn comparison(
    ctx: &StageContext<'_>,
    universe: &AttributeUniverse,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    let column = require(&universe.all(), "WHERE", "any", rng)?.clone();
    let op = random::pick(&CmpOp::ALL, rng).copied().unwrap_or(CmpOp::Eq);
    let quantifier = quantifier(rng);

    // Without a quantifier the inner query must be scalar.
    let aggregate = match (quantifier, universe.type_of(&column)) {
        (Some(_), _) => None,
        (None, Some(ColumnType::Number)) => random::pick(&AggFunc::NUMERIC, rng).copied(),
        (None, _) => random::pick(&[AggFunc::Max, AggFunc::Min], rng).copied(),
    };
    let spec = sampler::predicate_spec(ctx.pool, &hosts(ctx, &column), false, ctx.depth, rng)?;
    let demand = ColumnDemand::Resolve {
        column: bare_name(&column).to_string(),
        aggregate,
    };
    let sql = inner_sql(ctx, spec, demand, None, rng)?;
    Ok(format!("{} {} {}({})", column, op.symbol(), prefixed(quantifier), sql))
}

/// A table related to an outer table, and how to correlate with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Related {
    pub(crate) inner_table: String,
    pub(crate) correlation: Correlation,
}

pub(crate) fn related_tables(ctx: &StageContext<'_>, universe: &AttributeUniverse, table_ref: &TableRef) -> Vec<Related> {
    let mut out = Vec::new();
    for table in table_ref.tables() {
        let Some(qualifier) = table_ref.qualifier_for(table) else {
            continue;
        };
        for edge in ctx.graph.edges_of(table) {
            let (Some((inner_table, inner_key)), Some(outer_key)) =
                (edge.other_end(table), edge.key_of(table))
            else {
                continue;
            };
            let outer = format!("{}.{}", qualifier, outer_key);
            // A derived table only exposes what its inner query projected.
            if matches!(table_ref, TableRef::Derived { .. }) && !universe.contains(&outer) {
                continue;
            }
            out.push(Related {
                inner_table: inner_table.to_string(),
                correlation: Correlation {
                    outer,
                    inner_column: inner_key.to_string(),
                },
            });
        }
    }
    out
}

fn exists(
    ctx: &StageContext<'_>,
    keyword: &str,
    universe: &AttributeUniverse,
    table_ref: &TableRef,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    let candidates = related_tables(ctx, universe, table_ref);
    let related = random::pick(&candidates, rng)
        .cloned()
        .ok_or_else(|| SynthError::infeasible("WHERE", "no table related to the outer query"))?;
    let force_alias = table_ref.tables().contains(&related.inner_table.as_str());
    let spec = sampler::predicate_spec(
        ctx.pool,
        std::slice::from_ref(&related.inner_table),
        force_alias,
        ctx.depth,
        rng,
    )?;
    let star = if random::coin(rng) { "*" } else { "1" };
    let sql = inner_sql(
        ctx,
        spec,
        ColumnDemand::Verbatim(star.to_string()),
        Some(related.correlation),
        rng,
    )?;
    Ok(format!("{} ({})", keyword, sql))
}
