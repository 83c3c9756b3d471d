//! Derivation of the specifications nested queries are built from.
//!
//! A nested query starts from a random entry of the specification pool (or
//! the default specification when the pool is empty) and is then constrained
//! to what its enclosing clause can use.

use super::*;
use crate::random;
use rand::RngCore;

/// Budget for a query nested below one whose budget is `parent`.
pub fn child_budget(parent: DepthBudget) -> SynthResult<DepthBudget> {
    if !parent.allows_subquery() {
        return Err(SynthError::DepthBudget(format!(
            "subquery requested with depth budget [{}, {}]",
            parent.min, parent.max
        )));
    }
    Ok(parent.child())
}

fn draw(pool: &[Specification], rng: &mut dyn RngCore) -> Specification {
    random::pick(pool, rng).cloned().unwrap_or_default()
}

/// Inner query of a WHERE predicate or a scalar SELECT slot.
///
/// Reads a single table out of `tables` (aliased on a coin flip, or always
/// when `force_alias` is set) and drops every clause after WHERE.
pub fn predicate_spec(
    pool: &[Specification],
    tables: &[String],
    force_alias: bool,
    parent: DepthBudget,
    rng: &mut dyn RngCore,
) -> SynthResult<Specification> {
    let depth = child_budget(parent)?;
    let table = random::pick(tables, rng)
        .cloned()
        .ok_or_else(|| SynthError::infeasible("subquery", "no table can host the inner query"))?;

    let mut spec = draw(pool, rng);
    spec.table_exp = if force_alias || random::coin(rng) {
        TableExprShape::AliasedTable(Some(table))
    } else {
        TableExprShape::SingleTable(Some(table))
    };
    spec.group_by_columns = 0;
    spec.having = HavingShape::None;
    spec.order_by = OrderByMode::None;
    spec.limit = LimitMode::None;
    spec.select = SelectShape::Slots(Vec::new());
    spec.depth = depth;
    spec.where_shape = constrain_where(&spec.where_shape, depth, rng);
    Ok(spec)
}

/// Inner query of a derived table in FROM.
pub fn derived_table_spec(
    pool: &[Specification],
    parent: DepthBudget,
    rng: &mut dyn RngCore,
) -> SynthResult<Specification> {
    let depth = child_budget(parent)?;
    let mut spec = draw(pool, rng);
    spec.table_exp = TableExprShape::SingleTable(None);
    spec.group_by_columns = 0;
    spec.having = HavingShape::None;
    spec.order_by = OrderByMode::None;
    spec.limit = LimitMode::None;
    // Scalar subquery slots stay while the inner query may still nest.
    if !depth.allows_subquery() {
        if let SelectShape::Slots(slots) = &spec.select {
            let kept: Vec<SlotKind> = slots.iter().copied().filter(|s| !s.is_subquery()).collect();
            spec.select = if kept.is_empty() {
                SelectShape::default()
            } else {
                SelectShape::Slots(kept)
            };
        }
    }
    spec.depth = depth;
    spec.where_shape = constrain_where(&spec.where_shape, depth, rng);
    Ok(spec)
}

/// Apply the nesting policy of `depth` to a WHERE shape.
///
/// A positive minimum forces a subquery predicate, a positive maximum keeps
/// the shape as drawn, and an exhausted budget replaces every subquery
/// predicate with a simple one.
pub fn constrain_where(shape: &WhereShape, depth: DepthBudget, rng: &mut dyn RngCore) -> WhereShape {
    if depth.requires_subquery() {
        if shape.contains_subquery() {
            return shape.clone();
        }
        let kind = random::pick(&SubqueryKind::ALL, rng)
            .copied()
            .unwrap_or(SubqueryKind::In);
        return WhereShape::Subquery(kind);
    }
    if depth.allows_subquery() {
        return shape.clone();
    }
    strip_subqueries(shape, rng)
}

fn strip_subqueries(shape: &WhereShape, rng: &mut dyn RngCore) -> WhereShape {
    match shape {
        WhereShape::Subquery(_) => {
            // `None` sits first; predicates are preferred.
            let simple = WhereShape::simple_shapes();
            random::pick(&simple[1..], rng).cloned().unwrap_or_default()
        }
        WhereShape::Logical { op, left, right } => WhereShape::Logical {
            op: *op,
            left: Box::new(strip_subqueries(left, rng)),
            right: Box::new(strip_subqueries(right, rng)),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;

    fn nested_pool() -> Vec<Specification> {
        vec![Specification {
            where_shape: WhereShape::Logical {
                op: LogicalOp::And,
                left: Box::new(WhereShape::Subquery(SubqueryKind::In)),
                right: Box::new(WhereShape::Between),
            },
            group_by_columns: 2,
            having: HavingShape::Multiple,
            order_by: OrderByMode::Multiple,
            select: SelectShape::Slots(vec![SlotKind::Subquery, SlotKind::AliasedColumn]),
            ..Specification::default()
        }]
    }

    #[test]
    fn test_exhausted_budget_is_a_defect() {
        let mut rng = seeded(1);
        let err = predicate_spec(&[], &["t".into()], false, DepthBudget::default(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, SynthError::DepthBudget(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_predicate_spec_strips_at_last_level() {
        let mut rng = seeded(2);
        let parent = DepthBudget::new(1, 1).unwrap();
        for _ in 0..20 {
            let spec = predicate_spec(&nested_pool(), &["t".into()], false, parent, &mut rng).unwrap();
            assert_eq!(spec.depth, DepthBudget::default());
            assert!(!spec.uses_subquery());
            assert_eq!(spec.group_by_columns, 0);
            assert_eq!(spec.having, HavingShape::None);
            assert_eq!(spec.order_by, OrderByMode::None);
            assert!(matches!(
                spec.table_exp,
                TableExprShape::SingleTable(Some(_)) | TableExprShape::AliasedTable(Some(_))
            ));
        }
    }

    #[test]
    fn test_minimum_depth_forces_subquery() {
        let mut rng = seeded(3);
        let parent = DepthBudget::new(2, 2).unwrap();
        let spec = predicate_spec(&[], &["t".into()], true, parent, &mut rng).unwrap();
        assert!(spec.where_shape.contains_subquery());
        assert!(matches!(spec.table_exp, TableExprShape::AliasedTable(Some(_))));
    }

    #[test]
    fn test_derived_table_drops_subquery_slots() {
        let mut rng = seeded(4);
        let parent = DepthBudget::new(0, 1).unwrap();
        let spec = derived_table_spec(&nested_pool(), parent, &mut rng).unwrap();
        assert_eq!(spec.select, SelectShape::Slots(vec![SlotKind::AliasedColumn]));
        assert!(!spec.uses_subquery());
    }

    #[test]
    fn test_derived_table_keeps_subquery_slots_with_budget() {
        let mut rng = seeded(6);
        let parent = DepthBudget::new(0, 2).unwrap();
        let spec = derived_table_spec(&nested_pool(), parent, &mut rng).unwrap();
        assert_eq!(spec.depth, DepthBudget::new(0, 1).unwrap());
        assert_eq!(
            spec.select,
            SelectShape::Slots(vec![SlotKind::Subquery, SlotKind::AliasedColumn])
        );
    }

    #[test]
    fn test_no_host_table() {
        let mut rng = seeded(5);
        let parent = DepthBudget::new(0, 1).unwrap();
        let err = predicate_spec(&[], &[], false, parent, &mut rng).unwrap_err();
        assert!(err.is_recoverable());
    }
}
