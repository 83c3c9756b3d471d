//! Value-expression synthesizer.
//!
//! Produces arithmetic, string-function and aggregate expressions over the
//! typed columns of an [`AttributeUniverse`].

use super::AttributeUniverse;
use crate::random;
use crate::schema::ColumnType;
use crate::spec::AggFunc;
use rand::{Rng, RngCore};

const ARITHMETIC_OPS: [&str; 4] = ["+", "-", "*", "/"];

const MATH_FUNCS: [&str; 11] = [
    "ABS", "CEILING", "FLOOR", "ROUND", "EXP", "POWER", "SQRT", "LOG", "LOG10", "RAND", "SIGN",
];

const STRING_FUNCS: [&str; 10] = [
    "UPPER",
    "LOWER",
    "LENGTH",
    "CONCAT",
    "SUBSTRING",
    "REPLACE",
    "TRIM",
    "LEFT",
    "RIGHT",
    "CHARINDEX",
];

/// Nesting limit for parenthesised sub-expressions.
const MAX_DEPTH: u32 = 3;

/// An arithmetic expression of one or two operands.
pub fn arithmetic(universe: &AttributeUniverse, rng: &mut dyn RngCore) -> String {
    let parts = rng.random_range(1..=2);
    arithmetic_with(&universe.number, parts, MAX_DEPTH, rng)
}

/// An arithmetic expression of exactly `parts` operands.
///
/// Falls back to integer constants when no numeric column is visible.
pub fn arithmetic_with(numbers: &[String], parts: usize, depth: u32, rng: &mut dyn RngCore) -> String {
    let mut tokens = Vec::with_capacity(parts * 2);
    for i in 0..parts.max(1) {
        if i > 0 {
            tokens.push(random::pick(&ARITHMETIC_OPS, rng).copied().unwrap_or("+").to_string());
        }
        tokens.push(operand(numbers, depth, rng));
    }
    tokens.join(" ")
}

fn operand(numbers: &[String], depth: u32, rng: &mut dyn RngCore) -> String {
    let choice = if depth == 0 {
        rng.random_range(0..2)
    } else {
        rng.random_range(0..3)
    };
    match (choice, random::pick(numbers, rng)) {
        (1, Some(column)) => match rng.random_range(0..3) {
            0 => column.clone(),
            2 if depth > 0 => {
                let parts = rng.random_range(1..=3);
                let inner = arithmetic_with(numbers, parts, depth - 1, rng);
                math_call(&inner, rng)
            }
            _ => math_call(column, rng),
        },
        (2, _) => {
            let parts = rng.random_range(2..=3);
            format!("({})", arithmetic_with(numbers, parts, depth.saturating_sub(1), rng))
        }
        _ => constant(rng),
    }
}

fn constant(rng: &mut dyn RngCore) -> String {
    rng.random_range(1..=100).to_string()
}

fn math_call(argument: &str, rng: &mut dyn RngCore) -> String {
    let func = random::pick(&MATH_FUNCS, rng).copied().unwrap_or("ABS");
    match func {
        "POWER" | "ROUND" => format!("{}({},{})", func, argument, rng.random_range(2..=5)),
        _ => format!("{}({})", func, argument),
    }
}

/// A string-function call over a text column and the type it yields.
pub fn string_function(column: &str, rng: &mut dyn RngCore) -> (String, ColumnType) {
    let func = random::pick(&STRING_FUNCS, rng).copied().unwrap_or("UPPER");
    match func {
        "SUBSTRING" => (format!("SUBSTRING({}, 1, 3)", column), ColumnType::Text),
        "REPLACE" => (format!("REPLACE({}, 'a', 'b')", column), ColumnType::Text),
        "CHARINDEX" => (format!("CHARINDEX('a', {})", column), ColumnType::Number),
        "CONCAT" => (format!("CONCAT({}, 'a')", column), ColumnType::Text),
        "LEFT" | "RIGHT" => (format!("{}({}, 3)", func, column), ColumnType::Text),
        "LENGTH" => (format!("LENGTH({})", column), ColumnType::Number),
        other => (format!("{}({})", other, column), ColumnType::Text),
    }
}

/// Aggregates usable in a SELECT slot over a numeric column.
pub const SELECT_AGGREGATES: [AggFunc; 5] =
    [AggFunc::Max, AggFunc::Min, AggFunc::Avg, AggFunc::Sum, AggFunc::Count];

pub fn aggregate(column: &str, rng: &mut dyn RngCore) -> String {
    let func = random::pick(&SELECT_AGGREGATES, rng).copied().unwrap_or(AggFunc::Count);
    func.apply(column)
}

pub fn aliased(expression: &str, alias: &str) -> String {
    format!("{} AS {}", expression, alias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;

    fn universe() -> AttributeUniverse {
        AttributeUniverse {
            number: vec!["a".into(), "b".into()],
            text: vec!["name".into()],
        }
    }

    fn balanced(s: &str) -> bool {
        let mut depth = 0i32;
        for c in s.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return false;
            }
        }
        depth == 0
    }

    #[test]
    fn test_arithmetic_is_well_formed() {
        let mut rng = seeded(21);
        for _ in 0..200 {
            let expr = arithmetic(&universe(), &mut rng);
            assert!(!expr.is_empty());
            assert!(balanced(&expr), "{}", expr);
            assert!(!expr.ends_with(['+', '-', '*', '/']), "{}", expr);
        }
    }

    #[test]
    fn test_arithmetic_without_columns_uses_constants() {
        let mut rng = seeded(22);
        for _ in 0..50 {
            let expr = arithmetic(&AttributeUniverse::default(), &mut rng);
            assert!(!expr.contains('a') && !expr.contains('b'), "{}", expr);
        }
    }

    #[test]
    fn test_string_function_uses_column() {
        let mut rng = seeded(23);
        for _ in 0..30 {
            let (expr, _) = string_function("name", &mut rng);
            assert!(expr.contains("name"));
        }
    }

    #[test]
    fn test_aggregate_shape() {
        let mut rng = seeded(24);
        let expr = aggregate("a", &mut rng);
        assert!(expr.ends_with("(a)"));
    }
}
