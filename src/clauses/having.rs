//! HAVING stage.

use super::{AttributeUniverse, PartialQuery, StageContext, require};
use crate::error::{SynthError, SynthResult};
use crate::random;
use crate::spec::{AggFunc, CmpOp, HavingShape, LogicalOp};
use rand::{Rng, RngCore};

pub fn build_having(
    ctx: &StageContext<'_>,
    partial: &PartialQuery,
    shape: &HavingShape,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<PartialQuery>> {
    let conditions = match shape {
        HavingShape::None => return Ok(vec![partial.clone()]),
        HavingShape::Single(agg) => single(&partial.universe, *agg, ctx.random_choice, rng)?,
        HavingShape::Multiple => {
            let aggs = random::pick_unique(&AggFunc::ALL, 2, rng)
                .ok_or_else(|| SynthError::ExhaustedSample("HAVING aggregates".into()))?;
            let left = first(single(&partial.universe, aggs[0], true, rng)?)?;
            let right = first(single(&partial.universe, aggs[1], true, rng)?)?;
            let op = random::pick(&LogicalOp::ALL, rng).copied().unwrap_or(LogicalOp::And);
            vec![format!("(({}) {} ({}))", left, op.keyword(), right)]
        }
    };
    Ok(conditions
        .iter()
        .map(|c| partial.extend(&format!(" HAVING {}", c)))
        .collect())
}

fn first(conditions: Vec<String>) -> SynthResult<String> {
    conditions
        .into_iter()
        .next()
        .ok_or_else(|| SynthError::infeasible("HAVING", "no condition"))
}

/// `AGG(col) op n`, one per operator (one random operator in single-sample mode).
fn single(
    universe: &AttributeUniverse,
    agg: AggFunc,
    random_choice: bool,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<String>> {
    let ops: Vec<CmpOp> = if random_choice {
        random::pick(&CmpOp::HAVING, rng).copied().into_iter().collect()
    } else {
        CmpOp::HAVING.to_vec()
    };
    let all = universe.all();
    let mut out = Vec::with_capacity(ops.len());
    for op in ops {
        let column = match agg {
            AggFunc::CountDistinct => require(&all, "HAVING", "any", rng)?,
            _ => require(&universe.number, "HAVING", "numeric", rng)?,
        };
        let value: u32 = rng.random_range(1..=100);
        out.push(format!("{} {} {}", agg.apply(column), op.symbol(), value));
    }
    Ok(out)
}
