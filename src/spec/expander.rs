//! Specification expander.
//!
//! Turns a coarse [`SpecConfig`] (lists of allowed clause kinds) into a set of
//! concrete, deduplicated specifications by random sampling.

use super::codec::{having_from_value, slot_from_tag, table_exp_from_value, where_from_tag};
use super::sampler::constrain_where;
use super::*;
use crate::join::{JoinGraph, max_join_arity};
use crate::random;
use rand::RngCore;
use serde_json::json;

/// Allowed kinds for the clauses of one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// `single_table`, `single_table_with_name_changing`, `join_<n>`, `subquery`.
    pub table_exp_types: Vec<String>,
    #[serde(default)]
    pub join_types: Vec<String>,
    #[serde(default = "default_meaningful")]
    pub meaningful_joins: Vec<String>,
    /// `none`, `between`, `null_check`, `basic_comparison`,
    /// `pattern_matching`, `in_set`, `subquery`, `logical_operators`.
    pub where_clause_types: Vec<String>,
    #[serde(default)]
    pub basic_comp_ops: Vec<String>,
    #[serde(default)]
    pub null_operators: Vec<String>,
    #[serde(default)]
    pub pattern_matching_types: Vec<String>,
    #[serde(default)]
    pub like_or_not_like: Vec<String>,
    #[serde(default)]
    pub in_set: Vec<String>,
    #[serde(default)]
    pub subquery_in_where: Vec<String>,
    #[serde(alias = "number_of_valu_exps_in_group_by")]
    pub number_of_value_exps_in_group_by: Vec<usize>,
    pub having_types: Vec<String>,
    #[serde(default)]
    pub aggregate_functions_for_having: Vec<String>,
    pub orderby_types: Vec<String>,
    pub limit_types: Vec<String>,
    #[serde(default = "default_distinct")]
    pub distinct_types: Vec<String>,
    pub value_exp_types: Vec<String>,
    pub number_of_value_exps_in_select: Vec<SelectCount>,
    #[serde(default)]
    pub agg_col: Vec<String>,
    #[serde(default)]
    pub string_func_col: Vec<String>,
    #[serde(default)]
    pub arithmatic_col: Vec<String>,
    #[serde(default)]
    pub min_max_depth_in_subquery: [u32; 2],
}

fn default_meaningful() -> Vec<String> {
    vec!["yes".to_string()]
}

fn default_distinct() -> Vec<String> {
    vec!["none".to_string()]
}

/// A SELECT-list length, or `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectCount {
    Slots(usize),
    Star(String),
}

/// Expander input: set operations plus per-side clause kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecConfig {
    #[serde(default = "default_set_ops")]
    pub set_op_types: Vec<String>,
    pub first_query: QueryConfig,
    #[serde(default)]
    pub second_query: Option<QueryConfig>,
}

fn default_set_ops() -> Vec<String> {
    vec!["none".to_string()]
}

impl SpecConfig {
    pub fn from_json(content: &str) -> SynthResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SynthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynthError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

/// Every concrete option of one query config, ready for sampling.
#[derive(Debug, Clone, Default)]
struct Options {
    table_exp: Vec<TableExprShape>,
    meaningful: Vec<Meaningfulness>,
    where_shapes: Vec<WhereShape>,
    group_by: Vec<usize>,
    having_grouped: Vec<HavingShape>,
    order_by: Vec<OrderByMode>,
    limit: Vec<LimitMode>,
    distinct: Vec<bool>,
    select: Vec<SelectShape>,
    depth: DepthBudget,
}

/// Samples concrete specifications for one database.
#[derive(Debug, Clone, Copy)]
pub struct SpecExpander<'a> {
    graph: &'a JoinGraph,
}

impl<'a> SpecExpander<'a> {
    pub fn new(graph: &'a JoinGraph) -> Self {
        Self { graph }
    }

    /// Draw `count` entries and keep the distinct ones.
    pub fn expand(
        &self,
        db_id: &str,
        config: &SpecConfig,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> SynthResult<SpecSet> {
        let first = self.options(&config.first_query)?;
        let second = match &config.second_query {
            Some(q) => self.options(q)?,
            None => first.clone(),
        };
        let set_ops: Vec<Option<SetOp>> = config
            .set_op_types
            .iter()
            .map(|tag| match tag.as_str() {
                "none" => Ok(None),
                other => SetOp::from_keyword(other)
                    .map(Some)
                    .ok_or_else(|| SynthError::malformed(format!("unknown set_op_type '{}'", other))),
            })
            .collect::<SynthResult<_>>()?;

        let mut set = SpecSet::new(db_id);
        for _ in 0..count {
            let entry = match *choose(&set_ops, "set_op_types", rng)? {
                None => QuerySpec::Single(sample(&first, rng)?),
                Some(op) => {
                    let mut left = sample(&first, rng)?;
                    let mut right = sample(&second, rng)?;
                    for side in [&mut left, &mut right] {
                        side.group_by_columns = 0;
                        side.having = HavingShape::None;
                        side.depth = DepthBudget::default();
                        fit_to_budget(side, rng);
                    }
                    left.select = right.select.clone();
                    QuerySpec::Compound {
                        op,
                        first: left,
                        second: right,
                    }
                }
            };
            set.insert(entry);
        }
        tracing::info!(db = db_id, drawn = count, kept = set.len(), "expanded specifications");
        Ok(set)
    }

    fn options(&self, config: &QueryConfig) -> SynthResult<Options> {
        let meaningful = config
            .meaningful_joins
            .iter()
            .map(|m| match m.as_str() {
                "yes" => Ok(Meaningfulness::Yes),
                "no" => Ok(Meaningfulness::No),
                "mixed" => Ok(Meaningfulness::Mixed),
                other => Err(SynthError::malformed(format!("unknown meaningful_joins '{}'", other))),
            })
            .collect::<SynthResult<Vec<_>>>()?;

        let only_meaningful = meaningful.iter().all(|m| *m == Meaningfulness::Yes);
        let max_joins = max_join_arity(self.graph);
        let join_kinds = config
            .join_types
            .iter()
            .map(|k| {
                JoinKind::from_keyword(k)
                    .ok_or_else(|| SynthError::malformed(format!("unknown join type '{}'", k)))
            })
            .collect::<SynthResult<Vec<_>>>()?;

        let mut table_exp = Vec::new();
        for tag in &config.table_exp_types {
            match tag.strip_prefix("join_") {
                Some(n) => {
                    let n: usize = n
                        .parse()
                        .map_err(|_| SynthError::malformed(format!("bad join count in '{}'", tag)))?;
                    if only_meaningful && n > max_joins {
                        continue;
                    }
                    table_exp.extend(multisets(&join_kinds, n).into_iter().map(TableExprShape::Join));
                }
                None => table_exp.push(table_exp_from_value(&json!(tag))?),
            }
        }

        let (order_by, limit) = (
            config
                .orderby_types
                .iter()
                .map(|t| order_by_from_tag(t))
                .collect::<SynthResult<Vec<_>>>()?,
            config
                .limit_types
                .iter()
                .map(|t| match t.as_str() {
                    "none" => Ok(LimitMode::None),
                    "without_offset" => Ok(LimitMode::WithoutOffset),
                    "with_offset" => Ok(LimitMode::WithOffset),
                    other => Err(SynthError::malformed(format!("unknown limit_type '{}'", other))),
                })
                .collect::<SynthResult<Vec<_>>>()?,
        );

        let depth = DepthBudget::new(
            config.min_max_depth_in_subquery[0],
            config.min_max_depth_in_subquery[1],
        )?;

        Ok(Options {
            table_exp,
            meaningful,
            where_shapes: where_options(config)?,
            group_by: config.number_of_value_exps_in_group_by.clone(),
            having_grouped: having_options(config)?,
            order_by,
            limit,
            distinct: config.distinct_types.iter().map(|d| d == "distinct").collect(),
            select: select_options(config)?,
            depth,
        })
    }
}

fn order_by_from_tag(tag: &str) -> SynthResult<OrderByMode> {
    let value = json!({ "orderby_type": tag });
    codec::spec_from_value(&value).map(|s| s.order_by)
}

fn where_options(config: &QueryConfig) -> SynthResult<Vec<WhereShape>> {
    let mut shapes = Vec::new();
    for kind in &config.where_clause_types {
        match kind.as_str() {
            "none" | "between" => shapes.push(where_from_tag(kind)?),
            "null_check" => {
                for op in &config.null_operators {
                    let op = NullOp::ALL
                        .into_iter()
                        .find(|o| o.keyword() == op)
                        .ok_or_else(|| SynthError::malformed(format!("unknown null operator '{}'", op)))?;
                    shapes.push(WhereShape::NullCheck(Some(op)));
                }
            }
            "basic_comparison" => {
                for op in &config.basic_comp_ops {
                    let op = CmpOp::from_symbol(op)
                        .ok_or_else(|| SynthError::malformed(format!("unknown comparison '{}'", op)))?;
                    shapes.push(WhereShape::BasicComparison(Some(op)));
                }
            }
            "pattern_matching" => {
                for like in &config.like_or_not_like {
                    let like = LikeOp::ALL
                        .into_iter()
                        .find(|l| l.keyword() == like)
                        .ok_or_else(|| SynthError::malformed(format!("unknown like operator '{}'", like)))?;
                    for pattern in &config.pattern_matching_types {
                        let pattern = PatternKind::ALL
                            .into_iter()
                            .find(|p| p.tag() == pattern)
                            .ok_or_else(|| SynthError::malformed(format!("unknown pattern '{}'", pattern)))?;
                        shapes.push(WhereShape::PatternMatching(Some(like), Some(pattern)));
                    }
                }
            }
            "in_set" => {
                for tag in &config.in_set {
                    shapes.push(where_from_tag(tag)?);
                }
            }
            "subquery" => {
                for tag in &config.subquery_in_where {
                    shapes.push(where_from_tag(tag)?);
                }
            }
            "logical_operators" => {}
            other => {
                return Err(SynthError::malformed(format!("unknown where clause type '{}'", other)));
            }
        }
    }
    if config.where_clause_types.iter().any(|k| k == "logical_operators") {
        add_logical_combinations(&mut shapes);
    }
    Ok(shapes)
}

/// Pair up simple predicates with AND and OR.
///
/// At most one side of a pair may carry an operator; both sides are reduced
/// to their unparameterised form.
fn add_logical_combinations(shapes: &mut Vec<WhereShape>) {
    let base = shapes.len();
    for i in 0..base {
        for j in i + 1..base {
            let (a, b) = (&shapes[i], &shapes[j]);
            if *a == WhereShape::None || *b == WhereShape::None {
                continue;
            }
            if is_parameterised(a) && is_parameterised(b) {
                continue;
            }
            let (left, right) = (unparameterised(a), unparameterised(b));
            for op in LogicalOp::ALL {
                shapes.push(WhereShape::Logical {
                    op,
                    left: Box::new(left.clone()),
                    right: Box::new(right.clone()),
                });
            }
        }
    }
}

fn is_parameterised(shape: &WhereShape) -> bool {
    matches!(
        shape,
        WhereShape::BasicComparison(Some(_))
            | WhereShape::PatternMatching(Some(_), _)
            | WhereShape::PatternMatching(_, Some(_))
            | WhereShape::NullCheck(Some(_))
            | WhereShape::Logical { .. }
    )
}

fn unparameterised(shape: &WhereShape) -> WhereShape {
    match shape {
        WhereShape::BasicComparison(_) => WhereShape::BasicComparison(None),
        WhereShape::PatternMatching(..) => WhereShape::PatternMatching(None, None),
        WhereShape::NullCheck(_) => WhereShape::NullCheck(None),
        other => other.clone(),
    }
}

fn having_options(config: &QueryConfig) -> SynthResult<Vec<HavingShape>> {
    let mut shapes = Vec::new();
    if config.having_types.iter().any(|h| h == "single") {
        for agg in &config.aggregate_functions_for_having {
            shapes.push(having_from_value(&json!({ "single": agg }))?);
        }
    }
    if config.having_types.iter().any(|h| h == "multiple") {
        shapes.push(HavingShape::Multiple);
    }
    if config.having_types.iter().any(|h| h == "none") {
        shapes.push(HavingShape::None);
    }
    Ok(shapes)
}

fn select_options(config: &QueryConfig) -> SynthResult<Vec<SelectShape>> {
    let mut tags = config.value_exp_types.clone();
    for (toggles, base) in [
        (&config.agg_col, "agg_exp"),
        (&config.string_func_col, "string_func_exp"),
        (&config.arithmatic_col, "arithmatic_exp"),
    ] {
        if toggles.is_empty() {
            continue;
        }
        if toggles.iter().any(|t| t == "alias") {
            tags.push(format!("{}_alias", base));
        }
        if !toggles.iter().any(|t| t == "no_alias") {
            tags.retain(|t| t != base);
        }
    }
    let mut kinds = tags
        .iter()
        .map(|t| slot_from_tag(t))
        .collect::<SynthResult<Vec<_>>>()?;
    kinds.sort();
    kinds.dedup();

    let mut shapes = Vec::new();
    for count in &config.number_of_value_exps_in_select {
        match count {
            SelectCount::Star(s) if s == "*" => shapes.push(SelectShape::Star),
            SelectCount::Star(other) => {
                return Err(SynthError::malformed(format!("bad select count '{}'", other)));
            }
            SelectCount::Slots(n) => {
                shapes.extend(multisets(&kinds, *n).into_iter().map(SelectShape::Slots))
            }
        }
    }
    Ok(shapes)
}

fn sample(options: &Options, rng: &mut dyn RngCore) -> SynthResult<Specification> {
    let group_by_columns = *choose(&options.group_by, "number_of_value_exps_in_group_by", rng)?;
    let having = if group_by_columns == 0 {
        HavingShape::None
    } else {
        choose(&options.having_grouped, "having_types", rng)?.clone()
    };
    let select = choose(&options.select, "number_of_value_exps_in_select", rng)?.clone();
    let single_slot = match &select {
        SelectShape::Star => true,
        SelectShape::Slots(slots) => slots.len() == 1,
    };
    let order_by = if single_slot && group_by_columns == 0 {
        let single = [
            OrderByMode::Asc,
            OrderByMode::Desc,
            OrderByMode::NumberAsc,
            OrderByMode::NumberDesc,
            OrderByMode::None,
        ];
        *choose(&single, "orderby_types", rng)?
    } else {
        *choose(&options.order_by, "orderby_types", rng)?
    };

    let mut spec = Specification {
        meaningful_joins: *choose(&options.meaningful, "meaningful_joins", rng)?,
        table_exp: choose(&options.table_exp, "table_exp_types", rng)?.clone(),
        where_shape: choose(&options.where_shapes, "where_clause_types", rng)?.clone(),
        group_by_columns,
        having,
        order_by,
        limit: *choose(&options.limit, "limit_types", rng)?,
        select,
        distinct: *choose(&options.distinct, "distinct_types", rng)?,
        depth: options.depth,
    };
    fit_to_budget(&mut spec, rng);
    Ok(spec)
}

/// Drop the nested shapes an exhausted budget cannot build.
fn fit_to_budget(spec: &mut Specification, rng: &mut dyn RngCore) {
    spec.where_shape = constrain_where(&spec.where_shape, spec.depth, rng);
    if spec.depth.allows_subquery() {
        return;
    }
    if spec.table_exp == TableExprShape::Subquery {
        spec.table_exp = TableExprShape::SingleTable(None);
    }
    if let SelectShape::Slots(slots) = &mut spec.select {
        slots.retain(|s| !s.is_subquery());
        if slots.is_empty() {
            spec.select = SelectShape::default();
        }
    }
}

fn choose<'t, T>(items: &'t [T], field: &str, rng: &mut dyn RngCore) -> SynthResult<&'t T> {
    random::pick(items, rng)
        .ok_or_else(|| SynthError::malformed(format!("configuration list '{}' is empty", field)))
}

/// Sorted combinations with repetition of `size` items.
fn multisets<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    fn walk<T: Clone>(items: &[T], start: usize, size: usize, acc: &mut Vec<T>, out: &mut Vec<Vec<T>>) {
        if acc.len() == size {
            out.push(acc.clone());
            return;
        }
        for i in start..items.len() {
            acc.push(items[i].clone());
            walk(items, i, size, acc, out);
            acc.pop();
        }
    }
    let mut out = Vec::new();
    if size > 0 {
        walk(items, 0, size, &mut Vec::with_capacity(size), &mut out);
    }
    out
}
