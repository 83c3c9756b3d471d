//! GROUP BY stage.

use super::{PartialQuery, StageContext, TableRef};
use crate::error::{SynthError, SynthResult};
use crate::random;
use rand::RngCore;

/// Distinct column sets drawn in exhaustive mode.
const SAMPLES: usize = 2;
const MAX_ATTEMPTS: usize = 10;

/// Group on `column_count` non-key columns. Grouped columns are forced into
/// the SELECT list.
pub fn build_group_by(
    ctx: &StageContext<'_>,
    partial: &PartialQuery,
    table_ref: &TableRef,
    column_count: usize,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<PartialQuery>> {
    if column_count == 0 {
        return Ok(vec![partial.clone()]);
    }
    let keys = table_ref.key_columns(ctx.schema);
    let eligible: Vec<String> = partial
        .universe
        .all()
        .into_iter()
        .filter(|c| !keys.contains(c))
        .collect();
    if eligible.len() < column_count {
        return Err(SynthError::infeasible(
            "GROUP BY",
            format!("{} columns requested, {} eligible", column_count, eligible.len()),
        ));
    }

    let target = if ctx.random_choice || eligible.len() == column_count {
        1
    } else {
        SAMPLES
    };
    let mut groups: Vec<Vec<String>> = Vec::with_capacity(target);
    for _ in 0..MAX_ATTEMPTS {
        if groups.len() == target {
            break;
        }
        let Some(columns) = random::pick_unique(&eligible, column_count, rng) else {
            break;
        };
        let mut key = columns.clone();
        key.sort();
        let duplicate = groups.iter().any(|g| {
            let mut seen = g.clone();
            seen.sort();
            seen == key
        });
        if !duplicate {
            groups.push(columns);
        }
    }
    tracing::debug!(count = groups.len(), "GROUP BY candidates");

    Ok(groups
        .iter()
        .map(|columns| partial.extend_forced(&format!(" GROUP BY {}", columns.join(", ")), columns))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clauses::AttributeUniverse;
    use crate::generator::QueryGenerator;
    use crate::random::seeded;
    use crate::schema::ColumnType::{Number, Text};
    use crate::schema::SchemaContext;
    use crate::spec::DepthBudget;

    fn schema() -> SchemaContext {
        SchemaContext::builder("db")
            .table("t", &[("id", Number), ("a", Number), ("b", Text), ("c", Text)])
            .primary_key("t", "id")
            .build()
            .unwrap()
    }

    fn partial() -> PartialQuery {
        PartialQuery::new(
            " FROM t",
            AttributeUniverse {
                number: vec!["id".into(), "a".into()],
                text: vec!["b".into(), "c".into()],
            },
        )
    }

    #[test]
    fn test_keys_are_never_grouped() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(false, DepthBudget::default());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let mut rng = seeded(51);
        for _ in 0..20 {
            let out = build_group_by(&ctx, &partial(), &table_ref, 2, &mut rng).unwrap();
            assert!(!out.is_empty() && out.len() <= SAMPLES);
            for p in &out {
                assert_eq!(p.forced.len(), 2);
                assert!(!p.forced.contains(&"id".to_string()));
                assert!(p.text.starts_with(" FROM t GROUP BY "));
            }
        }
    }

    #[test]
    fn test_single_combination() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(false, DepthBudget::default());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let mut rng = seeded(52);
        let out = build_group_by(&ctx, &partial(), &table_ref, 3, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        let err = build_group_by(&ctx, &partial(), &table_ref, 4, &mut rng).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_zero_columns_passes_through() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(true, DepthBudget::default());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let mut rng = seeded(53);
        let out = build_group_by(&ctx, &partial(), &table_ref, 0, &mut rng).unwrap();
        assert_eq!(out, vec![partial()]);
    }
}
