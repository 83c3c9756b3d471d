//! WHERE stage.

use super::{AttributeUniverse, PartialQuery, StageContext, TableRef, require, subquery};
use crate::error::{SynthError, SynthResult};
use crate::generator::Correlation;
use crate::random;
use crate::spec::{CmpOp, LikeOp, NullOp, PatternKind, WhereShape};
use rand::RngCore;

const NUMBER_SET: &str = "(1, 2, 3, 40, 5)";
const WORD_COUNT: usize = 5;

/// Every predicate a WHERE shape expands to. `None` yields no predicate.
pub fn build_where(
    ctx: &StageContext<'_>,
    shape: &WhereShape,
    universe: &AttributeUniverse,
    table_ref: &TableRef,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<String>> {
    match shape {
        WhereShape::None => Ok(Vec::new()),
        WhereShape::BasicComparison(op) => {
            let ops = expand(*op, &CmpOp::ALL, ctx.random_choice, rng);
            let mut out = Vec::with_capacity(ops.len());
            for op in ops {
                let column = require(&universe.number, "WHERE", "numeric", rng)?;
                let rhs = super::expr::arithmetic(universe, rng);
                out.push(format!("{} {} {}", column, op.symbol(), rhs));
            }
            Ok(out)
        }
        WhereShape::PatternMatching(like, kind) => {
            let likes = expand(*like, &LikeOp::ALL, ctx.random_choice, rng);
            let kinds = expand(*kind, &PatternKind::ALL, ctx.random_choice, rng);
            let mut out = Vec::with_capacity(likes.len() * kinds.len());
            for like in &likes {
                for kind in &kinds {
                    let column = require(&universe.text, "WHERE", "text", rng)?;
                    out.push(format!("{} {} {}", column, like.keyword(), kind.literal()));
                }
            }
            Ok(out)
        }
        WhereShape::NullCheck(op) => {
            let all = universe.all();
            let mut out = Vec::new();
            for op in expand(*op, &NullOp::ALL, ctx.random_choice, rng) {
                let column = require(&all, "WHERE", "any", rng)?;
                out.push(format!("{} {}", column, op.keyword()));
            }
            Ok(out)
        }
        WhereShape::InSet => in_set(universe, "IN", rng).map(|p| vec![p]),
        WhereShape::NotInSet => in_set(universe, "NOT IN", rng).map(|p| vec![p]),
        WhereShape::Between => {
            let column = require(&universe.number, "WHERE", "numeric", rng)?;
            Ok(vec![format!("{} BETWEEN 1 AND 10", column)])
        }
        WhereShape::Logical { op, left, right } => {
            let lefts = build_where(ctx, left, universe, table_ref, rng)?;
            let rights = build_where(ctx, right, universe, table_ref, rng)?;
            match (lefts.is_empty(), rights.is_empty()) {
                (true, _) => Ok(rights),
                (_, true) => Ok(lefts),
                _ => Ok(lefts
                    .iter()
                    .flat_map(|l| rights.iter().map(move |r| format!("({}) {} ({})", l, op.keyword(), r)))
                    .collect()),
            }
        }
        WhereShape::Subquery(kind) => {
            subquery::build_subquery_predicate(ctx, *kind, universe, table_ref, rng).map(|p| vec![p])
        }
    }
}

/// A fixed operator, or every operator (one random one in single-sample mode).
fn expand<T: Copy>(fixed: Option<T>, all: &[T], random_choice: bool, rng: &mut dyn RngCore) -> Vec<T> {
    match fixed {
        Some(op) => vec![op],
        None if random_choice => random::pick(all, rng).copied().into_iter().collect(),
        None => all.to_vec(),
    }
}

fn in_set(universe: &AttributeUniverse, keyword: &str, rng: &mut dyn RngCore) -> SynthResult<String> {
    let numeric = match (universe.number.is_empty(), universe.text.is_empty()) {
        (true, true) => return Err(SynthError::infeasible("WHERE", "no column for a set predicate")),
        (false, true) => true,
        (true, false) => false,
        (false, false) => random::coin(rng),
    };
    if numeric {
        let column = require(&universe.number, "WHERE", "numeric", rng)?;
        Ok(format!("{} {} {}", column, keyword, NUMBER_SET))
    } else {
        let column = require(&universe.text, "WHERE", "text", rng)?;
        let words = random::quoted_words(WORD_COUNT, rng);
        Ok(format!("{} {} ({})", column, keyword, words.join(", ")))
    }
}

/// Append the WHERE clause to `partial`, one continuation per predicate.
///
/// A correlated inner query gets `outer = inner` conjoined to its predicate,
/// or as the whole clause when the shape has none.
pub fn complete_with_where(
    ctx: &StageContext<'_>,
    partial: &PartialQuery,
    shape: &WhereShape,
    table_ref: &TableRef,
    correlation: Option<&Correlation>,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<PartialQuery>> {
    let predicates = build_where(ctx, shape, &partial.universe, table_ref, rng)?;
    let conjunct = correlation
        .map(|c| correlating_conjunct(c, &partial.universe, table_ref))
        .transpose()?;

    if predicates.is_empty() {
        return Ok(vec![match conjunct {
            Some(conjunct) => partial.extend(&format!(" WHERE {}", conjunct)),
            None => partial.clone(),
        }]);
    }
    Ok(predicates
        .iter()
        .map(|p| match &conjunct {
            Some(conjunct) => partial.extend(&format!(" WHERE {} AND {}", p, conjunct)),
            None => partial.extend(&format!(" WHERE {}", p)),
        })
        .collect())
}

fn correlating_conjunct(
    correlation: &Correlation,
    universe: &AttributeUniverse,
    table_ref: &TableRef,
) -> SynthResult<String> {
    let inner = universe
        .resolve(&correlation.inner_column)
        .or_else(|| {
            let table = table_ref.tables().first().copied()?;
            let qualifier = table_ref.qualifier_for(table)?;
            Some(format!("{}.{}", qualifier, correlation.inner_column))
        })
        .ok_or_else(|| {
            SynthError::infeasible(
                "WHERE",
                format!("cannot correlate on column {}", correlation.inner_column),
            )
        })?;
    Ok(format!("{} = {}", correlation.outer, inner))
}
