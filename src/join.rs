//! Join planner.
//!
//! Builds an undirected graph over the tables from their foreign keys and
//! renders FROM clauses from it. Meaningful joins follow real FK edges;
//! meaningless joins pair arbitrary columns of randomly drawn tables.

use crate::error::{SynthError, SynthResult};
use crate::random;
use crate::schema::SchemaContext;
use rand::RngCore;
use std::collections::VecDeque;

/// A join keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    FullOuter,
    /// Bare `JOIN`.
    Plain,
}

impl JoinKind {
    pub const ALL: [JoinKind; 5] = [
        JoinKind::Inner,
        JoinKind::Left,
        JoinKind::Right,
        JoinKind::FullOuter,
        JoinKind::Plain,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::FullOuter => "FULL OUTER JOIN",
            JoinKind::Plain => "JOIN",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let normalized = keyword.split_whitespace().collect::<Vec<_>>().join(" ");
        Self::ALL
            .into_iter()
            .find(|k| k.keyword().eq_ignore_ascii_case(&normalized))
    }
}

/// One FK relationship between two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub left_table: String,
    pub right_table: String,
    pub left_key: String,
    pub right_key: String,
}

impl JoinEdge {
    pub fn touches(&self, table: &str) -> bool {
        self.left_table == table || self.right_table == table
    }

    /// The other endpoint as `(table, key)`, seen from `table`.
    pub fn other_end(&self, table: &str) -> Option<(&str, &str)> {
        if self.left_table == table {
            Some((&self.right_table, &self.right_key))
        } else if self.right_table == table {
            Some((&self.left_table, &self.left_key))
        } else {
            None
        }
    }

    /// This table's key in the relationship.
    pub fn key_of(&self, table: &str) -> Option<&str> {
        if self.left_table == table {
            Some(&self.left_key)
        } else if self.right_table == table {
            Some(&self.right_key)
        } else {
            None
        }
    }

    pub fn condition(&self) -> String {
        format!(
            "{}.{} = {}.{}",
            self.left_table, self.left_key, self.right_table, self.right_key
        )
    }
}

/// Undirected multigraph of FK relationships.
///
/// Only tables taking part in at least one relationship are nodes.
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    nodes: Vec<String>,
    edges: Vec<JoinEdge>,
}

impl JoinGraph {
    pub fn from_schema(schema: &SchemaContext) -> Self {
        let mut graph = Self::default();
        for (table, fks) in schema.foreign_keys() {
            for fk in fks {
                graph.edges.push(JoinEdge {
                    left_table: table.clone(),
                    right_table: fk.remote_table.clone(),
                    left_key: fk.column.clone(),
                    right_key: fk.remote_column.clone(),
                });
            }
        }
        let mut nodes: Vec<String> = graph
            .edges
            .iter()
            .flat_map(|e| [e.left_table.clone(), e.right_table.clone()])
            .collect();
        nodes.sort();
        nodes.dedup();
        graph.nodes = nodes;
        graph
    }

    /// Node names in sorted order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[JoinEdge] {
        &self.edges
    }

    /// Edges with one endpoint in `table`.
    pub fn edges_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a JoinEdge> + 'a {
        self.edges.iter().filter(move |e| e.touches(table))
    }

    fn neighbours<'a>(&'a self, table: &'a str, within: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        self.edges_of(table).filter_map(move |e| {
            e.other_end(table)
                .map(|(t, _)| t)
                .filter(|t| *t != table && within.iter().any(|w| w == t))
        })
    }

    /// Whether the subgraph induced by `tables` is connected.
    pub fn is_connected(&self, tables: &[String]) -> bool {
        let Some(start) = tables.first() else {
            return false;
        };
        let mut seen: Vec<&str> = vec![start.as_str()];
        let mut queue = VecDeque::from([start.as_str()]);
        while let Some(table) = queue.pop_front() {
            for next in self.neighbours(table, tables) {
                if !seen.contains(&next) {
                    seen.push(next);
                    queue.push_back(next);
                }
            }
        }
        seen.len() == tables.len()
    }

    /// Connected components, each listing its tables in discovery order.
    pub fn components(&self) -> Vec<Vec<String>> {
        let mut components: Vec<Vec<String>> = Vec::new();
        for node in &self.nodes {
            if components.iter().any(|c| c.contains(node)) {
                continue;
            }
            let mut component = vec![node.clone()];
            let mut queue = VecDeque::from([node.clone()]);
            while let Some(table) = queue.pop_front() {
                for next in self.neighbours(&table, &self.nodes) {
                    if !component.iter().any(|c| c == next) {
                        component.push(next.to_string());
                        queue.push_back(next.to_string());
                    }
                }
            }
            components.push(component);
        }
        components
    }
}

/// Largest join count any single FK-connected group of tables supports.
pub fn max_join_arity(graph: &JoinGraph) -> usize {
    graph
        .components()
        .iter()
        .map(|c| c.len().saturating_sub(1))
        .max()
        .unwrap_or(0)
}

/// A connected set of tables plus the FK edges among them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    pub tables: Vec<String>,
    pub edges: Vec<JoinEdge>,
}

impl JoinPlan {
    /// Visit order and the edge that reached each table after the first.
    fn spanning_tree(&self) -> Vec<(&str, Option<&JoinEdge>)> {
        let Some(root) = self.tables.first() else {
            return Vec::new();
        };
        let mut order: Vec<(&str, Option<&JoinEdge>)> = vec![(root.as_str(), None)];
        let mut queue = VecDeque::from([root.as_str()]);
        while let Some(table) = queue.pop_front() {
            for edge in self.edges.iter().filter(|e| e.touches(table)) {
                let Some((next, _)) = edge.other_end(table) else {
                    continue;
                };
                if !order.iter().any(|(t, _)| *t == next) {
                    order.push((next, Some(edge)));
                    queue.push_back(next);
                }
            }
        }
        order
    }
}

/// Every connected combination of `table_count` tables, in sorted order.
pub fn enumerate_connections(graph: &JoinGraph, table_count: usize) -> Vec<JoinPlan> {
    combinations(graph.nodes().len(), table_count)
        .into_iter()
        .map(|idx| idx.into_iter().map(|i| graph.nodes()[i].clone()).collect::<Vec<_>>())
        .filter(|tables| graph.is_connected(tables))
        .map(|tables| {
            let edges = graph
                .edges()
                .iter()
                .filter(|e| {
                    tables.contains(&e.left_table) && tables.contains(&e.right_table)
                })
                .cloned()
                .collect();
            JoinPlan { tables, edges }
        })
        .collect()
}

/// Index combinations of size `k` out of `n`, lexicographic.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k == 0 || k > n {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        let Some(pos) = (0..k).rev().find(|&i| idx[i] != i + n - k) else {
            break;
        };
        idx[pos] += 1;
        for j in pos + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
    out
}

/// A rendered FROM clause and the tables it brings into scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedTables {
    pub from_text: String,
    pub tables: Vec<String>,
}

/// Joins along real FK edges, one candidate per connected plan.
pub fn build_meaningful_join(
    graph: &JoinGraph,
    join_kinds: &[JoinKind],
    random_choice: bool,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<JoinedTables>> {
    if join_kinds.is_empty() {
        return Err(SynthError::infeasible("JOIN", "at least one join is required"));
    }
    let mut plans = enumerate_connections(graph, join_kinds.len() + 1);
    if plans.is_empty() {
        return Err(SynthError::infeasible(
            "JOIN",
            format!("no connected set of {} tables", join_kinds.len() + 1),
        ));
    }
    if random_choice {
        let i = random::pick_index(plans.len(), rng);
        plans = vec![plans.swap_remove(i)];
    }
    Ok(plans.iter().map(|p| render_plan(p, join_kinds)).collect())
}

fn render_plan(plan: &JoinPlan, join_kinds: &[JoinKind]) -> JoinedTables {
    let tree = plan.spanning_tree();
    let mut from_text = String::from(" FROM ");
    let mut tables = Vec::with_capacity(tree.len());
    for (i, (table, edge)) in tree.iter().enumerate() {
        match (i.checked_sub(1).and_then(|k| join_kinds.get(k)), edge) {
            (Some(kind), Some(edge)) => {
                from_text.push_str(&format!(" {} {} ON {}", kind.keyword(), table, edge.condition()))
            }
            _ => from_text.push_str(table),
        }
        tables.push(table.to_string());
    }
    JoinedTables { from_text, tables }
}

/// Joins on arbitrary column pairs of randomly drawn tables.
pub fn build_meaningless_join(
    schema: &SchemaContext,
    join_kinds: &[JoinKind],
    sample_count: usize,
    random_choice: bool,
    rng: &mut dyn RngCore,
) -> SynthResult<Vec<JoinedTables>> {
    let join_count = join_kinds.len();
    if join_count < 1 {
        return Err(SynthError::infeasible("JOIN", "at least one join is required"));
    }
    let names: Vec<&str> = schema.table_names().collect();
    if names.len() < join_count + 1 {
        return Err(SynthError::infeasible(
            "JOIN",
            format!("{} joins need more than {} tables", join_count, names.len()),
        ));
    }
    let samples = if random_choice { 1 } else { sample_count.max(1) };

    let mut out = Vec::with_capacity(samples);
    for _ in 0..samples {
        let tables = random::pick_unique(&names, join_count + 1, rng)
            .ok_or_else(|| SynthError::ExhaustedSample("join tables".into()))?;
        let mut from_text = format!(" FROM {}", tables[0]);
        for (kind, pair) in join_kinds.iter().zip(tables.windows(2)) {
            let left = random_column(schema, pair[0], rng)?;
            let right = random_column(schema, pair[1], rng)?;
            from_text.push_str(&format!(
                " {} {} ON {}.{} = {}.{}",
                kind.keyword(),
                pair[1],
                pair[0],
                left,
                pair[1],
                right
            ));
        }
        out.push(JoinedTables {
            from_text,
            tables: tables.iter().map(|t| t.to_string()).collect(),
        });
    }
    Ok(out)
}

fn random_column(schema: &SchemaContext, table: &str, rng: &mut dyn RngCore) -> SynthResult<String> {
    let def = schema.table(table)?;
    random::pick(&def.columns, rng)
        .map(|c| c.name.clone())
        .ok_or_else(|| SynthError::infeasible("JOIN", format!("table '{}' has no columns", table)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;
    use crate::schema::ColumnType::{Number, Text};

    fn farm() -> SchemaContext {
        SchemaContext::builder("farm")
            .table("city", &[("city_id", Number), ("official_name", Text)])
            .table("farm", &[("farm_id", Number), ("cows", Number)])
            .table(
                "farm_competition",
                &[("competition_id", Number), ("theme", Text), ("host_city_id", Number)],
            )
            .table(
                "competition_record",
                &[("competition_id", Number), ("farm_id", Number), ("rank", Number)],
            )
            .table("lonely", &[("x", Number)])
            .foreign_key("farm_competition", "host_city_id", "city", "city_id")
            .foreign_key("competition_record", "farm_id", "farm", "farm_id")
            .foreign_key(
                "competition_record",
                "competition_id",
                "farm_competition",
                "competition_id",
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_join_kind_keywords() {
        assert_eq!(JoinKind::from_keyword("left  join"), Some(JoinKind::Left));
        assert_eq!(JoinKind::from_keyword("FULL OUTER JOIN"), Some(JoinKind::FullOuter));
        assert_eq!(JoinKind::from_keyword("CROSS JOIN"), None);
    }

    #[test]
    fn test_graph_skips_unrelated_tables() {
        let graph = JoinGraph::from_schema(&farm());
        assert_eq!(graph.nodes().len(), 4);
        assert!(!graph.nodes().iter().any(|n| n == "lonely"));
        assert_eq!(max_join_arity(&graph), 3);
    }

    #[test]
    fn test_max_join_arity_without_edges() {
        let schema = SchemaContext::builder("db")
            .table("t", &[("id", Number)])
            .build()
            .unwrap();
        assert_eq!(max_join_arity(&JoinGraph::from_schema(&schema)), 0);
    }

    #[test]
    fn test_enumerate_connections_are_connected() {
        let graph = JoinGraph::from_schema(&farm());
        let pairs = enumerate_connections(&graph, 2);
        // Three FK edges, three connected pairs.
        assert_eq!(pairs.len(), 3);
        // city + farm_competition + competition_record is a path.
        let triples = enumerate_connections(&graph, 3);
        assert!(triples.iter().all(|p| graph.is_connected(&p.tables)));
        assert_eq!(triples.len(), 2);
    }

    #[test]
    fn test_meaningful_join_condition_count() {
        let graph = JoinGraph::from_schema(&farm());
        let mut rng = seeded(5);
        let kinds = [JoinKind::Inner, JoinKind::Left];
        let joins = build_meaningful_join(&graph, &kinds, false, &mut rng).unwrap();
        assert_eq!(joins.len(), 2);
        for joined in joins {
            assert_eq!(joined.tables.len(), 3);
            assert_eq!(joined.from_text.matches(" ON ").count(), 2);
            assert!(joined.from_text.contains(" INNER JOIN "));
            assert!(joined.from_text.contains(" LEFT JOIN "));
        }
    }

    #[test]
    fn test_meaningful_join_too_wide() {
        let graph = JoinGraph::from_schema(&farm());
        let mut rng = seeded(5);
        let kinds = [JoinKind::Inner; 4];
        let err = build_meaningful_join(&graph, &kinds, false, &mut rng).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_meaningless_join_samples() {
        let schema = farm();
        let mut rng = seeded(9);
        let joins = build_meaningless_join(&schema, &[JoinKind::Plain], 5, false, &mut rng).unwrap();
        assert_eq!(joins.len(), 5);
        for joined in &joins {
            assert_eq!(joined.tables.len(), 2);
            assert_ne!(joined.tables[0], joined.tables[1]);
            assert_eq!(joined.from_text.matches(" ON ").count(), 1);
        }
        let one = build_meaningless_join(&schema, &[JoinKind::Plain], 5, true, &mut rng).unwrap();
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_meaningless_join_needs_tables() {
        let schema = farm();
        let mut rng = seeded(9);
        assert!(build_meaningless_join(&schema, &[], 5, false, &mut rng).is_err());
        let kinds = [JoinKind::Inner; 5];
        assert!(build_meaningless_join(&schema, &kinds, 5, false, &mut rng).is_err());
    }

    #[test]
    fn test_combinations() {
        assert_eq!(combinations(4, 2).len(), 6);
        assert_eq!(combinations(3, 3), vec![vec![0, 1, 2]]);
        assert!(combinations(2, 3).is_empty());
    }
}
