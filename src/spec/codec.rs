//! JSON codec for specifications.
//!
//! The on-disk format uses string tags for simple shapes and single-key
//! objects for parameterised ones, e.g. `"between"`,
//! `{"basic_comparison": ">"}` or `{"logical_operator": ["AND", l, r]}`.

use super::*;
use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};

// ============================================================================
// Hashing
// ============================================================================

/// Render `value` with sorted keys and `", "` / `": "` separators.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push_str(": ");
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-1 of the canonical rendering.
pub fn content_hash(value: &Value) -> String {
    format!("{:x}", Sha1::digest(canonical_json(value).as_bytes()))
}

// ============================================================================
// Encoding
// ============================================================================

pub fn query_spec_to_value(spec: &QuerySpec) -> Value {
    match spec {
        QuerySpec::Single(spec) => spec_to_value(spec),
        QuerySpec::Compound { op, first, second } => json!({
            "set_op_type": op.keyword(),
            "first_query": spec_to_value(first),
            "second_query": spec_to_value(second),
        }),
    }
}

pub fn spec_to_value(spec: &Specification) -> Value {
    json!({
        "meaningful_joins": match spec.meaningful_joins {
            Meaningfulness::Yes => "yes",
            Meaningfulness::No => "no",
            Meaningfulness::Mixed => "mixed",
        },
        "table_exp_type": table_exp_to_value(&spec.table_exp),
        "where_type": where_to_value(&spec.where_shape),
        "number_of_value_exp_in_group_by": spec.group_by_columns,
        "having_type": match spec.having {
            HavingShape::None => json!("none"),
            HavingShape::Single(agg) => json!({ "single": agg.name() }),
            HavingShape::Multiple => json!("multiple"),
        },
        "orderby_type": order_by_tag(spec.order_by),
        "limit_type": match spec.limit {
            LimitMode::None => "none",
            LimitMode::WithoutOffset => "without_offset",
            LimitMode::WithOffset => "with_offset",
        },
        "value_exp_types": match &spec.select {
            SelectShape::Star => json!("*"),
            SelectShape::Slots(slots) => {
                Value::Array(slots.iter().map(|s| json!(slot_tag(*s))).collect())
            }
        },
        "distinct_type": if spec.distinct { "distinct" } else { "none" },
        "min_max_depth_in_subquery": [spec.depth.min, spec.depth.max],
    })
}

fn table_exp_to_value(shape: &TableExprShape) -> Value {
    match shape {
        TableExprShape::SingleTable(None) => json!("single_table"),
        TableExprShape::SingleTable(Some(t)) => json!({ "single_table": t }),
        TableExprShape::AliasedTable(None) => json!("single_table_with_name_changing"),
        TableExprShape::AliasedTable(Some(t)) => json!({ "single_table_with_name_changing": t }),
        TableExprShape::Join(kinds) => json!(
            kinds
                .iter()
                .map(|k| k.keyword())
                .collect::<Vec<_>>()
                .join("_")
        ),
        TableExprShape::Subquery => json!("subquery"),
    }
}

fn where_to_value(shape: &WhereShape) -> Value {
    match shape {
        WhereShape::None => json!("none"),
        WhereShape::BasicComparison(None) => json!("basic_comparison"),
        WhereShape::BasicComparison(Some(op)) => json!({ "basic_comparison": op.symbol() }),
        WhereShape::PatternMatching(None, None) => json!("pattern_matching"),
        WhereShape::PatternMatching(like, kind) => json!({
            "pattern_matching": [like.map(|l| l.keyword()), kind.map(|k| k.tag())]
        }),
        WhereShape::NullCheck(None) => json!("null_check"),
        WhereShape::NullCheck(Some(op)) => json!({ "null_check": op.keyword() }),
        WhereShape::InSet => json!("in_set"),
        WhereShape::NotInSet => json!("not_in_set"),
        WhereShape::Between => json!("between"),
        WhereShape::Logical { op, left, right } => json!({
            "logical_operator": [op.keyword(), where_to_value(left), where_to_value(right)]
        }),
        WhereShape::Subquery(kind) => json!(subquery_tag(*kind)),
    }
}

fn subquery_tag(kind: SubqueryKind) -> &'static str {
    match kind {
        SubqueryKind::In => "in_with_subquery",
        SubqueryKind::NotIn => "not_in_with_subquery",
        SubqueryKind::Comparison => "comparison_with_subquery",
        SubqueryKind::Exists => "exists_subquery",
        SubqueryKind::NotExists => "not_exists_subquery",
    }
}

fn order_by_tag(mode: OrderByMode) -> &'static str {
    match mode {
        OrderByMode::None => "none",
        OrderByMode::Asc => "ASC",
        OrderByMode::Desc => "DESC",
        OrderByMode::NumberAsc => "number_ASC",
        OrderByMode::NumberDesc => "number_DESC",
        OrderByMode::Multiple => "multiple",
    }
}

/// The tag a slot kind is written as.
pub fn slot_tag(kind: SlotKind) -> &'static str {
    match kind {
        SlotKind::Column(None) => "single_exp",
        SlotKind::Column(Some(ColumnType::Number)) => "single_exp_number",
        SlotKind::Column(Some(ColumnType::Text)) => "single_exp_text",
        SlotKind::Column(Some(ColumnType::Other)) => "single_exp",
        SlotKind::AliasedColumn => "alias_exp",
        SlotKind::Arithmetic { alias: false } => "arithmatic_exp",
        SlotKind::Arithmetic { alias: true } => "arithmatic_exp_alias",
        SlotKind::StringFunc { alias: false } => "string_func_exp",
        SlotKind::StringFunc { alias: true } => "string_func_exp_alias",
        SlotKind::Aggregate { alias: false } => "agg_exp",
        SlotKind::Aggregate { alias: true } => "agg_exp_alias",
        SlotKind::CountDistinct { alias: false } => "count_distinct_exp",
        SlotKind::CountDistinct { alias: true } => "count_distinct_exp_alias",
        SlotKind::Subquery => "subquery",
    }
}

// ============================================================================
// Decoding
// ============================================================================

pub fn query_spec_from_value(value: &Value) -> SynthResult<QuerySpec> {
    let map = as_object(value, "query specification")?;
    let Some(set_op) = map.get("set_op_type") else {
        return spec_from_value(value).map(QuerySpec::Single);
    };
    let first = map
        .get("first_query")
        .ok_or_else(|| SynthError::malformed("set operation without first_query"))?;
    let first = spec_from_value(first)?;
    let tag = as_str(set_op, "set_op_type")?;
    if tag == "none" {
        return Ok(QuerySpec::Single(first));
    }
    let op = SetOp::from_keyword(tag)
        .ok_or_else(|| SynthError::malformed(format!("unknown set_op_type '{}'", tag)))?;
    let second = map
        .get("second_query")
        .ok_or_else(|| SynthError::malformed(format!("{} without second_query", tag)))?;
    Ok(QuerySpec::Compound {
        op,
        first,
        second: spec_from_value(second)?,
    })
}

/// Decode one specification record. Missing fields take their defaults.
pub fn spec_from_value(value: &Value) -> SynthResult<Specification> {
    let map = as_object(value, "specification")?;
    let mut spec = Specification::default();

    if let Some(v) = map.get("meaningful_joins") {
        spec.meaningful_joins = match as_str(v, "meaningful_joins")? {
            "yes" => Meaningfulness::Yes,
            "no" => Meaningfulness::No,
            "mixed" => Meaningfulness::Mixed,
            other => return Err(unknown("meaningful_joins", other)),
        };
    }
    if let Some(v) = map.get("table_exp_type") {
        spec.table_exp = table_exp_from_value(v)?;
    }
    if let Some(v) = map.get("where_type") {
        spec.where_shape = where_from_value(v)?;
    }
    if let Some(v) = map.get("number_of_value_exp_in_group_by") {
        spec.group_by_columns = v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| unknown("number_of_value_exp_in_group_by", &v.to_string()))?;
    }
    if let Some(v) = map.get("having_type") {
        spec.having = having_from_value(v)?;
    }
    if let Some(v) = map.get("orderby_type") {
        let tag = as_str(v, "orderby_type")?;
        spec.order_by = OrderByMode::ALL
            .into_iter()
            .find(|m| order_by_tag(*m) == tag)
            .ok_or_else(|| unknown("orderby_type", tag))?;
    }
    if let Some(v) = map.get("limit_type") {
        spec.limit = match as_str(v, "limit_type")? {
            "none" => LimitMode::None,
            "without_offset" => LimitMode::WithoutOffset,
            "with_offset" => LimitMode::WithOffset,
            other => return Err(unknown("limit_type", other)),
        };
    }
    if let Some(v) = map.get("value_exp_types") {
        spec.select = select_from_value(v)?;
    }
    if let Some(v) = map.get("distinct_type") {
        spec.distinct = match v {
            Value::Bool(b) => *b,
            Value::String(s) if s == "distinct" => true,
            Value::String(s) if s == "none" => false,
            other => return Err(unknown("distinct_type", &other.to_string())),
        };
    }
    if let Some(v) = map.get("min_max_depth_in_subquery") {
        let pair = v
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| unknown("min_max_depth_in_subquery", &v.to_string()))?;
        let bound = |v: &Value| {
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| unknown("min_max_depth_in_subquery", &v.to_string()))
        };
        spec.depth = DepthBudget::new(bound(&pair[0])?, bound(&pair[1])?)?;
    }
    Ok(spec)
}

pub(crate) fn table_exp_from_value(value: &Value) -> SynthResult<TableExprShape> {
    if let Value::Object(map) = value {
        let (key, arg) = single_entry(map, "table_exp_type")?;
        let table = Some(as_str(arg, key)?.to_string());
        return match key {
            "single_table" => Ok(TableExprShape::SingleTable(table)),
            "single_table_with_name_changing" => Ok(TableExprShape::AliasedTable(table)),
            other => Err(unknown("table_exp_type", other)),
        };
    }
    match as_str(value, "table_exp_type")? {
        "single_table" => Ok(TableExprShape::SingleTable(None)),
        "single_table_with_name_changing" => Ok(TableExprShape::AliasedTable(None)),
        "subquery" => Ok(TableExprShape::Subquery),
        joins => joins
            .split('_')
            .map(|k| JoinKind::from_keyword(k).ok_or_else(|| unknown("table_exp_type", joins)))
            .collect::<SynthResult<Vec<_>>>()
            .map(TableExprShape::Join),
    }
}

fn where_from_value(value: &Value) -> SynthResult<WhereShape> {
    let Value::Object(map) = value else {
        return where_from_tag(as_str(value, "where_type")?);
    };
    let (key, arg) = single_entry(map, "where_type")?;
    match key {
        "basic_comparison" => {
            let op = optional_str(arg, key)?
                .map(|s| CmpOp::from_symbol(s).ok_or_else(|| unknown(key, s)))
                .transpose()?;
            Ok(WhereShape::BasicComparison(op))
        }
        "pattern_matching" => {
            let (like, kind) = match arg {
                Value::Array(parts) if parts.len() == 2 => (
                    optional_str(&parts[0], key)?,
                    optional_str(&parts[1], key)?,
                ),
                other => (optional_str(other, key)?, None),
            };
            let like = like
                .map(|s| {
                    LikeOp::ALL
                        .into_iter()
                        .find(|l| l.keyword() == s)
                        .ok_or_else(|| unknown(key, s))
                })
                .transpose()?;
            let kind = kind
                .map(|s| {
                    PatternKind::ALL
                        .into_iter()
                        .find(|k| k.tag() == s)
                        .ok_or_else(|| unknown(key, s))
                })
                .transpose()?;
            Ok(WhereShape::PatternMatching(like, kind))
        }
        "null_check" => {
            let op = optional_str(arg, key)?
                .map(|s| {
                    NullOp::ALL
                        .into_iter()
                        .find(|o| o.keyword() == s)
                        .ok_or_else(|| unknown(key, s))
                })
                .transpose()?;
            Ok(WhereShape::NullCheck(op))
        }
        "logical_operator" => {
            let parts = arg
                .as_array()
                .filter(|a| a.len() == 3)
                .ok_or_else(|| unknown(key, &arg.to_string()))?;
            let op = match as_str(&parts[0], key)? {
                "AND" => LogicalOp::And,
                "OR" => LogicalOp::Or,
                other => return Err(unknown(key, other)),
            };
            Ok(WhereShape::Logical {
                op,
                left: Box::new(where_from_value(&parts[1])?),
                right: Box::new(where_from_value(&parts[2])?),
            })
        }
        other => Err(unknown("where_type", other)),
    }
}

pub(crate) fn where_from_tag(tag: &str) -> SynthResult<WhereShape> {
    let shape = match tag {
        "none" => WhereShape::None,
        "basic_comparison" => WhereShape::BasicComparison(None),
        "pattern_matching" => WhereShape::PatternMatching(None, None),
        "null_check" => WhereShape::NullCheck(None),
        "IN" | "in_set" => WhereShape::InSet,
        "NOT IN" | "not_in_set" => WhereShape::NotInSet,
        "between" => WhereShape::Between,
        "in_with_subquery" => WhereShape::Subquery(SubqueryKind::In),
        "not_in_with_subquery" => WhereShape::Subquery(SubqueryKind::NotIn),
        "comparison_with_subquery" => WhereShape::Subquery(SubqueryKind::Comparison),
        "exists_subquery" | "exists_with_subquery" => WhereShape::Subquery(SubqueryKind::Exists),
        "not_exists_subquery" | "not_exists_with_subquery" => {
            WhereShape::Subquery(SubqueryKind::NotExists)
        }
        other => return Err(unknown("where_type", other)),
    };
    Ok(shape)
}

pub(crate) fn having_from_value(value: &Value) -> SynthResult<HavingShape> {
    if let Value::Object(map) = value {
        let (key, arg) = single_entry(map, "having_type")?;
        if key != "single" {
            return Err(unknown("having_type", key));
        }
        let name = as_str(arg, "having_type")?;
        return AggFunc::from_name(name)
            .map(HavingShape::Single)
            .ok_or_else(|| unknown("having_type", name));
    }
    match as_str(value, "having_type")? {
        "none" => Ok(HavingShape::None),
        "multiple" => Ok(HavingShape::Multiple),
        other => Err(unknown("having_type", other)),
    }
}

fn select_from_value(value: &Value) -> SynthResult<SelectShape> {
    match value {
        Value::String(s) if s == "*" => Ok(SelectShape::Star),
        Value::Array(items) => items
            .iter()
            .map(|item| slot_from_tag(as_str(item, "value_exp_types")?))
            .collect::<SynthResult<Vec<_>>>()
            .map(SelectShape::Slots),
        other => Err(unknown("value_exp_types", &other.to_string())),
    }
}

/// Parse a slot tag, accepting the historical spellings.
pub fn slot_from_tag(tag: &str) -> SynthResult<SlotKind> {
    let (base, alias) = match tag.strip_suffix("_alias") {
        Some(base) => (base, true),
        None => (tag, false),
    };
    let kind = match base {
        "single_exp" | "single_expl" if !alias => SlotKind::Column(None),
        "single_exp_number" if !alias => SlotKind::Column(Some(ColumnType::Number)),
        "single_exp_text" if !alias => SlotKind::Column(Some(ColumnType::Text)),
        "alias_exp" if !alias => SlotKind::AliasedColumn,
        "arithmatic_exp" | "arithmetic_exp" => SlotKind::Arithmetic { alias },
        "string_func_exp" | "string_func_col" => SlotKind::StringFunc { alias },
        "agg_exp" => SlotKind::Aggregate { alias },
        "count_distinct_exp" => SlotKind::CountDistinct { alias },
        "subquery" | "subquery_exp" => SlotKind::Subquery,
        _ => return Err(unknown("value_exp_types", tag)),
    };
    Ok(kind)
}

// ============================================================================
// Helpers
// ============================================================================

fn unknown(field: &str, tag: &str) -> SynthError {
    SynthError::malformed(format!("unknown {} '{}'", field, tag))
}

fn as_object<'a>(value: &'a Value, what: &str) -> SynthResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| SynthError::malformed(format!("{} must be an object", what)))
}

fn as_str<'a>(value: &'a Value, field: &str) -> SynthResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| unknown(field, &value.to_string()))
}

fn optional_str<'a>(value: &'a Value, field: &str) -> SynthResult<Option<&'a str>> {
    match value {
        Value::Null => Ok(None),
        other => as_str(other, field).map(Some),
    }
}

fn single_entry<'a>(map: &'a Map<String, Value>, field: &str) -> SynthResult<(&'a str, &'a Value)> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => Ok((key.as_str(), value)),
        _ => Err(SynthError::malformed(format!(
            "{} object must have exactly one key",
            field
        ))),
    }
}

impl TryFrom<Value> for QuerySpec {
    type Error = SynthError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        query_spec_from_value(&value)
    }
}

impl From<QuerySpec> for Value {
    fn from(spec: QuerySpec) -> Self {
        query_spec_to_value(&spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_full_record() {
        let value = json!({
            "meaningful_joins": "mixed",
            "table_exp_type": "INNER JOIN_LEFT JOIN",
            "where_type": {"logical_operator": ["AND", "basic_comparison", "in_with_subquery"]},
            "number_of_value_exp_in_group_by": 1,
            "having_type": {"single": "COUNT DISTINCT"},
            "orderby_type": "number_DESC",
            "limit_type": "with_offset",
            "value_exp_types": ["count_distinct_exp", "arithmatic_exp_alias", "single_exp_text"],
            "distinct_type": "distinct",
            "min_max_depth_in_subquery": [1, 2]
        });
        let spec = spec_from_value(&value).unwrap();
        assert_eq!(spec.meaningful_joins, Meaningfulness::Mixed);
        assert_eq!(
            spec.table_exp,
            TableExprShape::Join(vec![JoinKind::Inner, JoinKind::Left])
        );
        assert_eq!(
            spec.where_shape,
            WhereShape::Logical {
                op: LogicalOp::And,
                left: Box::new(WhereShape::BasicComparison(None)),
                right: Box::new(WhereShape::Subquery(SubqueryKind::In)),
            }
        );
        assert_eq!(spec.having, HavingShape::Single(AggFunc::CountDistinct));
        assert_eq!(spec.order_by, OrderByMode::NumberDesc);
        assert_eq!(
            spec.select,
            SelectShape::Slots(vec![
                SlotKind::CountDistinct { alias: false },
                SlotKind::Arithmetic { alias: true },
                SlotKind::Column(Some(ColumnType::Text)),
            ])
        );
        assert!(spec.distinct);
        assert_eq!(spec.depth, DepthBudget { min: 1, max: 2 });
        assert_eq!(spec_from_value(&spec_to_value(&spec)).unwrap(), spec);
    }

    #[test]
    fn test_decode_parameterised_shapes() {
        let table = table_exp_from_value(&json!({"single_table_with_name_changing": "city"})).unwrap();
        assert_eq!(table, TableExprShape::AliasedTable(Some("city".into())));

        let pattern = where_from_value(&json!({"pattern_matching": ["NOT LIKE", "second_char_a"]})).unwrap();
        assert_eq!(
            pattern,
            WhereShape::PatternMatching(Some(LikeOp::NotLike), Some(PatternKind::SecondCharA))
        );
        assert_eq!(where_from_value(&json!("IN")).unwrap(), WhereShape::InSet);
        assert_eq!(
            where_from_value(&json!({"null_check": "IS NOT NULL"})).unwrap(),
            WhereShape::NullCheck(Some(NullOp::IsNotNull))
        );
    }

    #[test]
    fn test_unknown_tags_are_malformed() {
        for value in [
            json!({"where_type": "sometimes"}),
            json!({"table_exp_type": "CROSS JOIN"}),
            json!({"value_exp_types": ["mystery_exp"]}),
            json!({"having_type": {"single": "MEDIAN"}}),
            json!({"min_max_depth_in_subquery": [2, 1]}),
        ] {
            let err = spec_from_value(&value).unwrap_err();
            assert!(matches!(err, SynthError::MalformedSpec(_)), "{}", value);
        }
    }

    #[test]
    fn test_set_op_wrapper() {
        let value = json!({
            "set_op_type": "UNION",
            "first_query": {"table_exp_type": "single_table"},
            "second_query": {"table_exp_type": "single_table_with_name_changing"}
        });
        let spec = query_spec_from_value(&value).unwrap();
        assert!(matches!(spec, QuerySpec::Compound { op: SetOp::Union, .. }));

        let none = json!({"set_op_type": "none", "first_query": {"where_type": "between"}});
        let QuerySpec::Single(single) = query_spec_from_value(&none).unwrap() else {
            panic!("expected a single specification");
        };
        assert_eq!(single.where_shape, WhereShape::Between);
    }

    #[test]
    fn test_canonical_json_matches_sorted_dump() {
        let value = json!({"b": [1, "x"], "a": {"d": null, "c": true}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a": {"c": true, "d": null}, "b": [1, "x"]}"#
        );
    }

    #[test]
    fn test_content_hash_is_stable() {
        let value = json!({"a": 1});
        // sha1 of `{"a": 1}`
        assert_eq!(content_hash(&value), "e4ad4daad53a2eec0313386ada88211e50d693bd");
        let spec = QuerySpec::Single(Specification::default());
        assert_eq!(spec.content_hash(), spec.clone().content_hash());
        assert_eq!(spec.content_hash().len(), 40);
    }
}
