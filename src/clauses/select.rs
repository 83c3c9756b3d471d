//! SELECT stage.

use super::subquery::{Related, related_tables};
use super::{AttributeUniverse, PartialQuery, StageContext, TableRef, bare_name, expr, require};
use crate::error::{SynthError, SynthResult};
use crate::generator::{ColumnDemand, GenerationRequest};
use crate::random;
use crate::schema::ColumnType;
use crate::spec::{AggFunc, SelectShape, SlotKind, TableExprShape, sampler};
use rand::RngCore;
use std::collections::BTreeMap;

/// Renderings of the slot list in exhaustive mode.
const REPETITIONS: usize = 3;

/// A rendered SELECT list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub text: String,
    /// One entry per item: the column reference, alias or expression text.
    pub fields: Vec<String>,
    pub value_exp_count: usize,
    pub alias_types: BTreeMap<String, ColumnType>,
}

/// Options of one SELECT stage invocation.
#[derive(Debug, Clone, Copy)]
pub struct SelectOptions<'s> {
    pub shape: &'s SelectShape,
    pub distinct: bool,
    /// Project exactly the forced items.
    pub is_subquery: bool,
    pub has_group_by: bool,
}

pub fn build_select(
    ctx: &StageContext<'_>,
    partial: &PartialQuery,
    table_ref: &TableRef,
    options: SelectOptions<'_>,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<Projection>> {
    let head = if options.distinct {
        "SELECT DISTINCT "
    } else {
        "SELECT "
    };

    if let SelectShape::Star = options.shape {
        let fields = partial.universe.all();
        return Ok(vec![Projection {
            text: format!("{}*", head),
            value_exp_count: fields.len(),
            fields,
            alias_types: BTreeMap::new(),
        }]);
    }

    if options.is_subquery {
        if partial.forced.is_empty() {
            return Err(SynthError::infeasible("SELECT", "inner query has nothing to project"));
        }
        return Ok(vec![Projection {
            text: format!("{}{}", head, partial.forced.join(", ")),
            fields: partial.forced.clone(),
            value_exp_count: partial.forced.len(),
            alias_types: BTreeMap::new(),
        }]);
    }

    let slots: &[SlotKind] = match options.shape {
        SelectShape::Slots(slots) => slots,
        SelectShape::Star => &[],
    };
    if slots.is_empty() && !options.has_group_by {
        return Err(SynthError::infeasible("SELECT", "empty slot list without GROUP BY"));
    }

    let repetitions = if ctx.random_choice { 1 } else { REPETITIONS };
    let mut out: Vec<Projection> = Vec::with_capacity(repetitions);
    for _ in 0..repetitions {
        let (mut items, mut projection) = render_slots(ctx, partial, table_ref, slots, rng)?;
        if options.has_group_by {
            for column in &partial.forced {
                if !projection.fields.contains(column) {
                    items.push(column.clone());
                    projection.fields.push(column.clone());
                }
            }
        }
        projection.text = format!("{}{}", head, items.join(", "));
        projection.value_exp_count = projection.fields.len();
        if !out.iter().any(|p| p.text == projection.text) {
            out.push(projection);
        }
    }
    Ok(out)
}

/// One rendering of the slot list: its items and their fields.
fn render_slots(
    ctx: &StageContext<'_>,
    partial: &PartialQuery,
    table_ref: &TableRef,
    slots: &[SlotKind],
    rng: &mut dyn RngCore,
) -> SynthResult<(Vec<String>, Projection)> {
    let universe = &partial.universe;
    let keys = table_ref.key_columns(ctx.schema);
    let mut taken: Vec<String> = universe.all().iter().map(|c| bare_name(c).to_string()).collect();
    let mut items = Vec::with_capacity(slots.len());
    let mut projection = Projection::default();

    for slot in slots {
        let item = match *slot {
            SlotKind::Column(ty) => {
                let pool = match ty {
                    Some(ty) => universe.pool(ty).to_vec(),
                    None => universe.all(),
                };
                let column = require(&prefer_non_keys(pool, &keys), "SELECT", "projectable", rng)?.clone();
                projection.fields.push(column.clone());
                column
            }
            SlotKind::AliasedColumn => {
                let pool = prefer_non_keys(universe.all(), &keys);
                let column = require(&pool, "SELECT", "projectable", rng)?.clone();
                let ty = universe.type_of(&column).unwrap_or(ColumnType::Other);
                aliased(&column, ty, &mut taken, &mut projection, rng)?
            }
            SlotKind::Arithmetic { alias } => {
                let expression = expr::arithmetic(universe, rng);
                maybe_aliased(expression, ColumnType::Number, alias, &mut taken, &mut projection, rng)?
            }
            SlotKind::StringFunc { alias } => {
                let column = require(&universe.text, "SELECT", "text", rng)?;
                let (expression, ty) = expr::string_function(column, rng);
                maybe_aliased(expression, ty, alias, &mut taken, &mut projection, rng)?
            }
            SlotKind::Aggregate { alias } => {
                let column = require(&universe.number, "SELECT", "numeric", rng)?;
                let expression = expr::aggregate(column, rng);
                maybe_aliased(expression, ColumnType::Number, alias, &mut taken, &mut projection, rng)?
            }
            SlotKind::CountDistinct { alias } => {
                let column = require(&universe.all(), "SELECT", "any", rng)?.clone();
                let expression = AggFunc::CountDistinct.apply(&column);
                maybe_aliased(expression, ColumnType::Number, alias, &mut taken, &mut projection, rng)?
            }
            SlotKind::Subquery => {
                let sql = scalar_subquery(ctx, universe, table_ref, rng)?;
                aliased(&format!("({})", sql), ColumnType::Number, &mut taken, &mut projection, rng)?
            }
        };
        items.push(item);
    }
    Ok((items, projection))
}

/// `pool` without primary keys, unless nothing else is left.
fn prefer_non_keys(pool: Vec<String>, keys: &[String]) -> Vec<String> {
    let non_keys: Vec<String> = pool.iter().filter(|c| !keys.contains(c)).cloned().collect();
    if non_keys.is_empty() { pool } else { non_keys }
}

fn aliased(
    expression: &str,
    ty: ColumnType,
    taken: &mut Vec<String>,
    projection: &mut Projection,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    let alias = random::fresh_letter(taken, rng)
        .ok_or_else(|| SynthError::ExhaustedSample("SELECT alias".into()))?;
    taken.push(alias.clone());
    projection.fields.push(alias.clone());
    if ty != ColumnType::Other {
        projection.alias_types.insert(alias.clone(), ty);
    }
    Ok(expr::aliased(expression, &alias))
}

fn maybe_aliased(
    expression: String,
    ty: ColumnType,
    alias: bool,
    taken: &mut Vec<String>,
    projection: &mut Projection,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    if alias {
        return aliased(&expression, ty, taken, projection, rng);
    }
    projection.fields.push(expression.clone());
    Ok(expression)
}

/// `SELECT AGG(col) FROM t ...` over a table with a numeric column.
///
/// On a coin flip the inner table is one related to the outer query by a
/// foreign key, correlated on that key.
fn scalar_subquery(
    ctx: &StageContext<'_>,
    universe: &AttributeUniverse,
    table_ref: &TableRef,
    rng: &mut dyn RngCore,
) -> SynthResult<String> {
    let has_number = |table: &str| {
        ctx.schema
            .table(table)
            .map(|t| t.columns.iter().any(|c| c.ty == ColumnType::Number))
            .unwrap_or(false)
    };
    let related: Vec<Related> = related_tables(ctx, universe, table_ref)
        .into_iter()
        .filter(|r| has_number(&r.inner_table))
        .collect();
    let correlated = if random::coin(rng) {
        random::pick(&related, rng).cloned()
    } else {
        None
    };

    let spec = match &correlated {
        Some(related) => {
            let force_alias = table_ref.tables().contains(&related.inner_table.as_str());
            sampler::predicate_spec(
                ctx.pool,
                std::slice::from_ref(&related.inner_table),
                force_alias,
                ctx.depth,
                rng,
            )?
        }
        None => {
            let hosts: Vec<String> = ctx
                .schema
                .table_names()
                .filter(|t| has_number(t))
                .map(str::to_string)
                .collect();
            sampler::predicate_spec(ctx.pool, &hosts, false, ctx.depth, rng)?
        }
    };
    let table = match &spec.table_exp {
        TableExprShape::SingleTable(Some(t)) | TableExprShape::AliasedTable(Some(t)) => t.clone(),
        _ => return Err(SynthError::infeasible("SELECT", "scalar subquery has no host table")),
    };
    let numbers: Vec<String> = ctx
        .schema
        .table(&table)?
        .columns
        .iter()
        .filter(|c| c.ty == ColumnType::Number)
        .map(|c| c.name.clone())
        .collect();
    let column = require(&numbers, "SELECT", "numeric", rng)?.clone();
    let aggregate = random::pick(&AggFunc::NUMERIC, rng).copied();

    let request = GenerationRequest {
        must_select: vec![ColumnDemand::Resolve { column, aggregate }],
        correlation: correlated.map(|r| r.correlation),
        ..GenerationRequest::nested(spec, true)
    };
    ctx.orchestrator
        .generate(rng, &request)?
        .into_iter()
        .next()
        .map(|c| c.sql)
        .ok_or_else(|| SynthError::infeasible("SELECT", "scalar subquery produced no completion"))
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
            .table("t", &[("id", Number), ("a", Number), ("b", Text)])
            .primary_key("t", "id")
            .build()
            .unwrap()
    }

    fn partial() -> PartialQuery {
        PartialQuery::new(
            " FROM t",
            AttributeUniverse {
                number: vec!["id".into(), "a".into()],
                text: vec!["b".into()],
            },
        )
    }

    fn options(shape: &SelectShape) -> SelectOptions<'_> {
        SelectOptions {
            shape,
            distinct: false,
            is_subquery: false,
            has_group_by: false,
        }
    }

    #[test]
    fn test_number_column_avoids_key() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(false, DepthBudget::default());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let shape = SelectShape::Slots(vec![SlotKind::Column(Some(Number))]);
        let mut rng = seeded(71);
        let out = build_select(&ctx, &partial(), &table_ref, options(&shape), &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "SELECT a");
        assert_eq!(out[0].value_exp_count, 1);
    }

    #[test]
    fn test_group_by_columns_follow_slots() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(true, DepthBudget::default());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let shape = SelectShape::Slots(vec![SlotKind::Aggregate { alias: false }]);
        let grouped = partial().extend_forced(" GROUP BY b", &["b".to_string()]);
        let mut rng = seeded(72);
        let out = build_select(
            &ctx,
            &grouped,
            &table_ref,
            SelectOptions {
                has_group_by: true,
                ..options(&shape)
            },
            &mut rng,
        )
        .unwrap();
        assert!(out[0].text.ends_with("), b"), "{}", out[0].text);
        assert_eq!(out[0].value_exp_count, 2);
    }

    #[test]
    fn test_aliases_are_fresh_and_typed() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(true, DepthBudget::default());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let shape = SelectShape::Slots(vec![
            SlotKind::AliasedColumn,
            SlotKind::Arithmetic { alias: true },
            SlotKind::CountDistinct { alias: true },
        ]);
        let mut rng = seeded(73);
        let out = build_select(&ctx, &partial(), &table_ref, options(&shape), &mut rng).unwrap();
        let projection = &out[0];
        assert_eq!(projection.fields.len(), 3);
        assert_eq!(projection.alias_types.len(), 3);
        for field in &projection.fields {
            assert_eq!(field.len(), 1);
            assert!(!["a", "b", "id"].contains(&field.as_str()));
        }
    }

    #[test]
    fn test_star_and_subquery_modes() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(true, DepthBudget::default());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let mut rng = seeded(74);

        let star = build_select(&ctx, &partial(), &table_ref, options(&SelectShape::Star), &mut rng).unwrap();
        assert_eq!(star[0].text, "SELECT *");
        assert_eq!(star[0].fields, vec!["id", "a", "b"]);

        let forced = partial().extend_forced("", &["MAX(a)".to_string()]);
        let empty = SelectShape::Slots(Vec::new());
        let inner = build_select(
            &ctx,
            &forced,
            &table_ref,
            SelectOptions {
                is_subquery: true,
                ..options(&empty)
            },
            &mut rng,
        )
        .unwrap();
        assert_eq!(inner[0].text, "SELECT MAX(a)");

        let err = build_select(&ctx, &partial(), &table_ref, options(&empty), &mut rng).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_scalar_subquery_slot() {
        let schema = schema();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(true, DepthBudget::new(1, 1).unwrap());
        let table_ref = TableRef::Tables(vec!["t".into()]);
        let shape = SelectShape::Slots(vec![SlotKind::Subquery]);
        let mut rng = seeded(75);
        let out = build_select(&ctx, &partial(), &table_ref, options(&shape), &mut rng).unwrap();
        let text = &out[0].text;
        assert!(text.starts_with("SELECT (SELECT "), "{}", text);
        assert!(text.contains(" FROM t"), "{}", text);
        assert_eq!(out[0].alias_types.values().next(), Some(&Number));
    }

    #[test]
    fn test_scalar_subquery_correlates_on_foreign_key() {
        let schema = SchemaContext::builder("db")
            .table("city", &[("id", Number), ("name", Text)])
            .table("farm", &[("id", Number), ("city_id", Number), ("cows", Number)])
            .primary_key("city", "id")
            .primary_key("farm", "id")
            .foreign_key("farm", "city_id", "city", "id")
            .build()
            .unwrap();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let ctx = generator.stage_context(true, DepthBudget::new(0, 1).unwrap());
        let table_ref = TableRef::Tables(vec!["city".into()]);
        let city = PartialQuery::new(
            " FROM city",
            AttributeUniverse {
                number: vec!["id".into()],
                text: vec!["name".into()],
            },
        );
        let shape = SelectShape::Slots(vec![SlotKind::Subquery]);
        let mut rng = seeded(76);
        let (mut correlated, mut plain) = (0, 0);
        for _ in 0..40 {
            let out = build_select(&ctx, &city, &table_ref, options(&shape), &mut rng).unwrap();
            let text = &out[0].text;
            if text.contains("city.id = ") {
                correlated += 1;
                assert!(text.contains("FROM farm"), "{}", text);
                assert!(text.contains("city_id) AS "), "{}", text);
            } else {
                plain += 1;
            }
        }
        assert!(correlated > 0 && plain > 0);
    }
}
