//! Table-expression stage: the FROM clause and the universe it opens.

use super::{AttributeUniverse, StageContext, TableRef, bare_name};
use crate::error::{SynthError, SynthResult};
use crate::generator::GenerationRequest;
use crate::join::{JoinedTables, build_meaningful_join, build_meaningless_join};
use crate::random;
use crate::schema::SchemaContext;
use crate::spec::{Meaningfulness, TableExprShape, sampler};
use rand::RngCore;
use std::collections::BTreeMap;

/// Candidates drawn for a meaningless join in exhaustive mode.
pub const MEANINGLESS_SAMPLES: usize = 5;

/// A FROM clause with its sources and visible columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableExpression {
    pub from_text: String,
    pub table_ref: TableRef,
    pub universe: AttributeUniverse,
}

pub fn build_table_expression(
    ctx: &StageContext<'_>,
    shape: &TableExprShape,
    meaningfulness: Meaningfulness,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<TableExpression>> {
    let schema = ctx.schema;
    match shape {
        TableExprShape::SingleTable(table) => single_tables(ctx, table.as_deref(), rng)?
            .into_iter()
            .map(|t| {
                Ok(TableExpression {
                    from_text: format!(" FROM {}", t),
                    universe: universe_for_tables(schema, std::slice::from_ref(&t))?,
                    table_ref: TableRef::Tables(vec![t]),
                })
            })
            .collect(),
        TableExprShape::AliasedTable(table) => single_tables(ctx, table.as_deref(), rng)?
            .into_iter()
            .map(|t| {
                let alias = random::fresh_letter(&[], rng)
                    .ok_or_else(|| SynthError::ExhaustedSample("table alias".into()))?;
                Ok(TableExpression {
                    from_text: format!(" FROM {} AS {}", t, alias),
                    universe: universe_for_alias(schema, &t, &alias)?,
                    table_ref: TableRef::Aliased { alias, table: t },
                })
            })
            .collect(),
        TableExprShape::Join(kinds) => {
            let joins = joined_tables(ctx, kinds, meaningfulness, rng)?;
            joins
                .into_iter()
                .map(|j| {
                    Ok(TableExpression {
                        universe: universe_for_tables(schema, &j.tables)?,
                        from_text: j.from_text,
                        table_ref: TableRef::Tables(j.tables),
                    })
                })
                .collect()
        }
        TableExprShape::Subquery => derived_table(ctx, rng).map(|t| vec![t]),
    }
}

fn single_tables(
    ctx: &StageContext<'_>,
    table: Option<&str>,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<String>> {
    if let Some(table) = table {
        ctx.schema.table(table)?;
        return Ok(vec![table.to_string()]);
    }
    let names: Vec<String> = ctx.schema.table_names().map(str::to_string).collect();
    if ctx.random_choice {
        let table = random::pick(&names, rng)
            .cloned()
            .ok_or_else(|| SynthError::infeasible("FROM", "schema has no tables"))?;
        Ok(vec![table])
    } else {
        Ok(names)
    }
}

fn joined_tables(
    ctx: &StageContext<'_>,
    kinds: &[crate::join::JoinKind],
    meaningfulness: Meaningfulness,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<JoinedTables>> {
    let random_choice = ctx.random_choice;
    let meaningless = |rng: &mut dyn RngCore| {
        build_meaningless_join(ctx.schema, kinds, MEANINGLESS_SAMPLES, random_choice, rng)
    };
    match meaningfulness {
        Meaningfulness::Yes => build_meaningful_join(ctx.graph, kinds, random_choice, rng),
        Meaningfulness::No => meaningless(rng),
        Meaningfulness::Mixed if random_choice => {
            if random::coin(rng) {
                match build_meaningful_join(ctx.graph, kinds, true, rng) {
                    Err(e) if e.is_recoverable() => {
                        tracing::debug!(error = %e, "no meaningful join, falling back");
                        meaningless(rng)
                    }
                    other => other,
                }
            } else {
                meaningless(rng)
            }
        }
        Meaningfulness::Mixed => {
            let mut joins = match build_meaningful_join(ctx.graph, kinds, false, rng) {
                Ok(joins) => joins,
                Err(e) if e.is_recoverable() => Vec::new(),
                Err(e) => return Err(e),
            };
            joins.extend(meaningless(rng)?);
            Ok(joins)
        }
    }
}

/// A nested query used as a FROM source.
fn derived_table(ctx: &StageContext<'_>, rng: &mut dyn RngCore) -> SynthResult<TableExpression> {
    let spec = sampler::derived_table_spec(ctx.pool, ctx.depth, rng)?;
    let request = GenerationRequest::nested(spec, false);
    let completion = ctx
        .orchestrator
        .generate(rng, &request)?
        .into_iter()
        .next()
        .ok_or_else(|| SynthError::infeasible("FROM", "derived table produced no query"))?;

    let alias = random::fresh_letter(&[], rng)
        .ok_or_else(|| SynthError::ExhaustedSample("derived table alias".into()))?;
    let mut universe = AttributeUniverse::default();
    let mut seen = Vec::new();
    for field in &completion.fields {
        let name = bare_name(field);
        if seen.iter().any(|s| s == name) {
            continue;
        }
        let ty = completion
            .alias_types
            .get(field)
            .copied()
            .or_else(|| completion.universe.type_of(field));
        if let Some(ty) = ty {
            universe.push(ty, format!("{}.{}", alias, name));
            seen.push(name.to_string());
        }
    }
    let tables = completion
        .table_ref
        .tables()
        .into_iter()
        .map(str::to_string)
        .collect();
    Ok(TableExpression {
        from_text: format!(" FROM ({}) AS {}", completion.sql, alias),
        table_ref: TableRef::Derived { alias, tables },
        universe,
    })
}

/// Universe over bare tables, qualifying only ambiguous column names.
pub fn universe_for_tables(schema: &SchemaContext, tables: &[String]) -> SynthResult<AttributeUniverse> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let defs = tables
        .iter()
        .map(|t| schema.table(t))
        .collect::<SynthResult<Vec<_>>>()?;
    for def in &defs {
        for column in &def.columns {
            *counts.entry(column.name.as_str()).or_default() += 1;
        }
    }
    let mut universe = AttributeUniverse::default();
    for def in &defs {
        for column in &def.columns {
            let reference = if counts.get(column.name.as_str()).copied().unwrap_or(0) > 1 {
                format!("{}.{}", def.name, column.name)
            } else {
                column.name.clone()
            };
            universe.push(column.ty, reference);
        }
    }
    Ok(universe)
}

/// Universe of `table AS alias`.
pub fn universe_for_alias(schema: &SchemaContext, table: &str, alias: &str) -> SynthResult<AttributeUniverse> {
    let def = schema.table(table)?;
    let mut universe = AttributeUniverse::default();
    for column in &def.columns {
        universe.push(column.ty, format!("{}.{}", alias, column.name));
    }
    Ok(universe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::QueryGenerator;
    use crate::join::JoinKind;
    use crate::random::seeded;
    use crate::schema::ColumnType::{Number, Other, Text};
    use crate::spec::DepthBudget;

    fn schema() -> SchemaContext {
        SchemaContext::builder("db")
            .table("city", &[("id", Number), ("name", Text), ("founded", Other)])
            .table("farm", &[("id", Number), ("city_id", Number), ("owner", Text)])
            .primary_key("city", "id")
            .primary_key("farm", "id")
            .foreign_key("farm", "city_id", "city", "id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_ambiguous_columns_are_qualified() {
        let universe = universe_for_tables(&schema(), &["city".into(), "farm".into()]).unwrap();
        assert_eq!(universe.number, vec!["city.id", "farm.id", "city_id"]);
        assert_eq!(universe.text, vec!["name", "owner"]);
    }

    #[test]
    fn test_mixed_without_foreign_keys_falls_back_to_meaningless() {
        let schema = SchemaContext::builder("db")
            .table("a", &[("x", Number), ("y", Text)])
            .table("b", &[("z", Number)])
            .build()
            .unwrap();
        let generator = QueryGenerator::new(&schema, Vec::new());
        let shape = TableExprShape::Join(vec![JoinKind::Inner]);
        let mut rng = seeded(21);

        let ctx = generator.stage_context(false, DepthBudget::default());
        let exhaustive = build_table_expression(&ctx, &shape, Meaningfulness::Mixed, &mut rng).unwrap();
        assert_eq!(exhaustive.len(), MEANINGLESS_SAMPLES);
        for table in &exhaustive {
            assert!(table.from_text.contains(" INNER JOIN "), "{}", table.from_text);
            assert_eq!(table.from_text.matches(" ON ").count(), 1, "{}", table.from_text);
            assert_eq!(table.table_ref.tables().len(), 2);
        }

        let ctx = generator.stage_context(true, DepthBudget::default());
        for _ in 0..10 {
            let single = build_table_expression(&ctx, &shape, Meaningfulness::Mixed, &mut rng).unwrap();
            assert_eq!(single.len(), 1);
        }
    }

    #[test]
    fn test_alias_universe_skips_other_types() {
        let universe = universe_for_alias(&schema(), "city", "q").unwrap();
        assert_eq!(universe.all(), vec!["q.id", "q.name"]);
    }
}
