//! Specification model.
//!
//! A [`Specification`] describes the shape of one query without naming any
//! concrete column. Every clause shape is a tagged union; the JSON codec in
//! [`codec`] maps them to and from the on-disk format.

pub mod codec;
pub mod expander;
pub mod sampler;

use crate::error::{SynthError, SynthResult};
use crate::schema::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub use crate::join::JoinKind;
pub use expander::{SpecConfig, SpecExpander};

/// Which join planner a join shape uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Meaningfulness {
    /// Joins follow FK edges.
    #[default]
    Yes,
    /// Joins pair arbitrary columns.
    No,
    /// Both, or one at random in single-sample mode.
    Mixed,
}

/// FROM clause shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableExprShape {
    /// One table, optionally pinned by name.
    SingleTable(Option<String>),
    /// One table renamed with a single-letter alias.
    AliasedTable(Option<String>),
    /// `len + 1` tables joined with these keywords in order.
    Join(Vec<JoinKind>),
    /// A derived table built by a nested query.
    Subquery,
}

impl Default for TableExprShape {
    fn default() -> Self {
        TableExprShape::SingleTable(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    /// `<>`
    Ne,
    /// `!=`
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CmpOp {
    pub const ALL: [CmpOp; 7] = [
        CmpOp::Eq,
        CmpOp::Ne,
        CmpOp::NotEq,
        CmpOp::Gt,
        CmpOp::Lt,
        CmpOp::Ge,
        CmpOp::Le,
    ];

    /// Operators allowed in HAVING comparisons.
    pub const HAVING: [CmpOp; 5] = [CmpOp::Eq, CmpOp::Gt, CmpOp::Lt, CmpOp::Ge, CmpOp::Le];

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::NotEq => "!=",
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LikeOp {
    Like,
    NotLike,
}

impl LikeOp {
    pub const ALL: [LikeOp; 2] = [LikeOp::Like, LikeOp::NotLike];

    pub fn keyword(self) -> &'static str {
        match self {
            LikeOp::Like => "LIKE",
            LikeOp::NotLike => "NOT LIKE",
        }
    }
}

/// Literal pattern families for `LIKE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    StartsWithA,
    EndsWithIng,
    Exactly5Characters,
    DoesNotContainXyz,
    ContainsAbc,
    SecondCharA,
}

impl PatternKind {
    pub const ALL: [PatternKind; 6] = [
        PatternKind::StartsWithA,
        PatternKind::EndsWithIng,
        PatternKind::Exactly5Characters,
        PatternKind::DoesNotContainXyz,
        PatternKind::ContainsAbc,
        PatternKind::SecondCharA,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            PatternKind::StartsWithA => "starts_with_a",
            PatternKind::EndsWithIng => "ends_with_ing",
            PatternKind::Exactly5Characters => "exactly_5_characters",
            PatternKind::DoesNotContainXyz => "does_not_contain_xyz",
            PatternKind::ContainsAbc => "contains_abc",
            PatternKind::SecondCharA => "second_char_a",
        }
    }

    /// The quoted pattern literal.
    pub fn literal(self) -> &'static str {
        match self {
            PatternKind::StartsWithA => "'a%'",
            PatternKind::EndsWithIng => "'%ing'",
            PatternKind::Exactly5Characters => "'_____'",
            PatternKind::DoesNotContainXyz => "'%xyz%'",
            PatternKind::ContainsAbc => "'%abc%'",
            PatternKind::SecondCharA => "'_a%'",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullOp {
    IsNull,
    IsNotNull,
}

impl NullOp {
    pub const ALL: [NullOp; 2] = [NullOp::IsNull, NullOp::IsNotNull];

    pub fn keyword(self) -> &'static str {
        match self {
            NullOp::IsNull => "IS NULL",
            NullOp::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub const ALL: [LogicalOp; 2] = [LogicalOp::And, LogicalOp::Or];

    pub fn keyword(self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }
}

/// Subquery predicate forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubqueryKind {
    In,
    NotIn,
    Comparison,
    Exists,
    NotExists,
}

impl SubqueryKind {
    pub const ALL: [SubqueryKind; 5] = [
        SubqueryKind::In,
        SubqueryKind::NotIn,
        SubqueryKind::Comparison,
        SubqueryKind::Exists,
        SubqueryKind::NotExists,
    ];
}

/// WHERE clause shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum WhereShape {
    #[default]
    None,
    BasicComparison(Option<CmpOp>),
    PatternMatching(Option<LikeOp>, Option<PatternKind>),
    NullCheck(Option<NullOp>),
    InSet,
    NotInSet,
    Between,
    Logical {
        op: LogicalOp,
        left: Box<WhereShape>,
        right: Box<WhereShape>,
    },
    Subquery(SubqueryKind),
}

impl WhereShape {
    /// Shapes that never re-enter the pipeline.
    pub fn simple_shapes() -> Vec<WhereShape> {
        vec![
            WhereShape::None,
            WhereShape::BasicComparison(None),
            WhereShape::PatternMatching(None, None),
            WhereShape::NullCheck(None),
            WhereShape::InSet,
            WhereShape::NotInSet,
            WhereShape::Between,
        ]
    }

    pub fn contains_subquery(&self) -> bool {
        match self {
            WhereShape::Subquery(_) => true,
            WhereShape::Logical { left, right, .. } => {
                left.contains_subquery() || right.contains_subquery()
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Max,
    Min,
    Avg,
    Sum,
    Count,
    CountDistinct,
}

impl AggFunc {
    pub const ALL: [AggFunc; 6] = [
        AggFunc::Max,
        AggFunc::Min,
        AggFunc::Avg,
        AggFunc::Sum,
        AggFunc::Count,
        AggFunc::CountDistinct,
    ];

    /// Aggregates that produce a single numeric value from a numeric column.
    pub const NUMERIC: [AggFunc; 4] = [AggFunc::Max, AggFunc::Min, AggFunc::Avg, AggFunc::Sum];

    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Max => "MAX",
            AggFunc::Min => "MIN",
            AggFunc::Avg => "AVG",
            AggFunc::Sum => "SUM",
            AggFunc::Count => "COUNT",
            AggFunc::CountDistinct => "COUNT DISTINCT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(&normalized))
    }

    /// Render the call over `column`.
    pub fn apply(self, column: &str) -> String {
        match self {
            AggFunc::CountDistinct => format!("COUNT(DISTINCT({}))", column),
            other => format!("{}({})", other.name(), column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum HavingShape {
    #[default]
    None,
    Single(AggFunc),
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderByMode {
    #[default]
    None,
    Asc,
    Desc,
    NumberAsc,
    NumberDesc,
    Multiple,
}

impl OrderByMode {
    pub const ALL: [OrderByMode; 6] = [
        OrderByMode::None,
        OrderByMode::Asc,
        OrderByMode::Desc,
        OrderByMode::NumberAsc,
        OrderByMode::NumberDesc,
        OrderByMode::Multiple,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LimitMode {
    #[default]
    None,
    WithoutOffset,
    WithOffset,
}

/// Kind of one SELECT-list slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKind {
    /// Bare column, optionally restricted to one type.
    Column(Option<ColumnType>),
    AliasedColumn,
    Arithmetic { alias: bool },
    StringFunc { alias: bool },
    Aggregate { alias: bool },
    CountDistinct { alias: bool },
    /// Scalar subquery `(...) AS x`.
    Subquery,
}

impl SlotKind {
    pub fn is_subquery(self) -> bool {
        matches!(self, SlotKind::Subquery)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectShape {
    Star,
    Slots(Vec<SlotKind>),
}

impl Default for SelectShape {
    fn default() -> Self {
        SelectShape::Slots(vec![SlotKind::Column(None)])
    }
}

/// Remaining subquery nesting, `min` levels required and `max` allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthBudget {
    pub min: u32,
    pub max: u32,
}

impl DepthBudget {
    pub fn new(min: u32, max: u32) -> SynthResult<Self> {
        if min > max {
            return Err(SynthError::malformed(format!(
                "subquery depth minimum {} exceeds maximum {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// Budget of a query nested one level below this one.
    pub fn child(self) -> Self {
        Self {
            min: self.min.saturating_sub(1),
            max: self.max.saturating_sub(1),
        }
    }

    pub fn allows_subquery(self) -> bool {
        self.max > 0
    }

    pub fn requires_subquery(self) -> bool {
        self.min > 0
    }
}

/// The shape of one SELECT query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Specification {
    pub meaningful_joins: Meaningfulness,
    pub table_exp: TableExprShape,
    pub where_shape: WhereShape,
    pub group_by_columns: usize,
    pub having: HavingShape,
    pub order_by: OrderByMode,
    pub limit: LimitMode,
    pub select: SelectShape,
    pub distinct: bool,
    pub depth: DepthBudget,
}

impl Specification {
    /// Whether any clause of this specification re-enters the pipeline.
    pub fn uses_subquery(&self) -> bool {
        matches!(self.table_exp, TableExprShape::Subquery)
            || self.where_shape.contains_subquery()
            || matches!(&self.select, SelectShape::Slots(slots) if slots.iter().any(|s| s.is_subquery()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

impl SetOp {
    pub const ALL: [SetOp; 4] = [SetOp::Union, SetOp::UnionAll, SetOp::Intersect, SetOp::Except];

    pub fn keyword(self) -> &'static str {
        match self {
            SetOp::Union => "UNION",
            SetOp::UnionAll => "UNION ALL",
            SetOp::Intersect => "INTERSECT",
            SetOp::Except => "EXCEPT",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let normalized = keyword.replace('_', " ");
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        Self::ALL
            .into_iter()
            .find(|op| op.keyword().eq_ignore_ascii_case(&normalized))
    }
}

/// A top-level entry of a specification file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum QuerySpec {
    Single(Specification),
    Compound {
        op: SetOp,
        first: Specification,
        second: Specification,
    },
}

impl QuerySpec {
    /// Lowercase hex SHA-1 of the canonical JSON form.
    pub fn content_hash(&self) -> String {
        codec::content_hash(&codec::query_spec_to_value(self))
    }

    /// The plain specifications this entry is made of.
    pub fn parts(&self) -> Vec<&Specification> {
        match self {
            QuerySpec::Single(spec) => vec![spec],
            QuerySpec::Compound { first, second, .. } => vec![first, second],
        }
    }
}

impl From<Specification> for QuerySpec {
    fn from(spec: Specification) -> Self {
        QuerySpec::Single(spec)
    }
}

/// Keyed specifications of one database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecSet {
    pub db_id: String,
    pub specs: BTreeMap<String, QuerySpec>,
}

impl SpecSet {
    pub fn new(db_id: impl Into<String>) -> Self {
        Self {
            db_id: db_id.into(),
            specs: BTreeMap::new(),
        }
    }

    /// Insert keyed by content hash. Returns false for duplicates.
    pub fn insert(&mut self, spec: QuerySpec) -> bool {
        let key = spec.content_hash();
        if self.specs.contains_key(&key) {
            return false;
        }
        self.specs.insert(key, spec);
        true
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Plain specifications usable as subquery templates.
    pub fn pool(&self) -> Vec<Specification> {
        self.specs
            .values()
            .flat_map(|s| s.parts().into_iter().cloned())
            .collect()
    }

    /// Parse the `{db_id: {key: spec}}` document for one database.
    pub fn from_json(content: &str, db_id: &str) -> SynthResult<Self> {
        let document: BTreeMap<String, BTreeMap<String, QuerySpec>> =
            serde_json::from_str(content)?;
        let specs = document.into_iter().find(|(id, _)| id == db_id).map(|(_, s)| s);
        match specs {
            Some(specs) => Ok(Self {
                db_id: db_id.to_string(),
                specs,
            }),
            None => Err(SynthError::Schema(format!(
                "no specifications for database '{}'",
                db_id
            ))),
        }
    }

    pub fn from_file(path: impl AsRef<Path>, db_id: &str) -> SynthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynthError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content, db_id)
    }

    /// The `{db_id: {key: spec}}` document.
    pub fn to_json(&self) -> SynthResult<String> {
        let mut document = BTreeMap::new();
        document.insert(&self.db_id, &self.specs);
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_budget_child() {
        let budget = DepthBudget::new(1, 2).unwrap();
        assert_eq!(budget.child(), DepthBudget { min: 0, max: 1 });
        assert_eq!(budget.child().child(), DepthBudget { min: 0, max: 0 });
        assert!(DepthBudget::new(2, 1).is_err());
    }

    #[test]
    fn test_agg_apply() {
        assert_eq!(AggFunc::Max.apply("a"), "MAX(a)");
        assert_eq!(AggFunc::CountDistinct.apply("b"), "COUNT(DISTINCT(b))");
        assert_eq!(AggFunc::from_name("count  distinct"), Some(AggFunc::CountDistinct));
    }

    #[test]
    fn test_uses_subquery() {
        let mut spec = Specification::default();
        assert!(!spec.uses_subquery());
        spec.where_shape = WhereShape::Logical {
            op: LogicalOp::Or,
            left: Box::new(WhereShape::Between),
            right: Box::new(WhereShape::Subquery(SubqueryKind::Exists)),
        };
        assert!(spec.uses_subquery());
    }

    #[test]
    fn test_set_op_keywords() {
        assert_eq!(SetOp::from_keyword("union_all"), Some(SetOp::UnionAll));
        assert_eq!(SetOp::from_keyword("EXCEPT"), Some(SetOp::Except));
        assert_eq!(SetOp::from_keyword("none"), None);
    }

    #[test]
    fn test_spec_set_dedup() {
        let mut set = SpecSet::new("farm");
        assert!(set.insert(Specification::default().into()));
        assert!(!set.insert(Specification::default().into()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_spec_set_file_round_trip() {
        let mut set = SpecSet::new("farm");
        set.insert(Specification::default().into());
        let json = set.to_json().unwrap();
        let back = SpecSet::from_json(&json, "farm").unwrap();
        assert_eq!(back, set);
        assert!(SpecSet::from_json(&json, "other").is_err());
    }
}
