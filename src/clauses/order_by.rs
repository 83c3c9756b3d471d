//! ORDER BY stage.

use super::select::Projection;
use crate::error::{SynthError, SynthResult};
use crate::random;
use crate::spec::OrderByMode;
use rand::{Rng, RngCore};

const DIRECTIONS: [&str; 2] = ["ASC", "DESC"];

/// The ORDER BY suffix for one projection, empty for [`OrderByMode::None`].
///
/// A `*` projection carries the whole universe as its fields.
pub fn build_order_by(projection: &Projection, mode: OrderByMode, rng: &mut dyn RngCore) -> SynthResult<String> {
    let fields = &projection.fields;
    let field = |rng: &mut dyn RngCore| {
        random::pick(fields, rng)
            .cloned()
            .ok_or_else(|| SynthError::infeasible("ORDER BY", "nothing to order by"))
    };
    let position = |rng: &mut dyn RngCore| {
        if projection.value_exp_count == 0 {
            Err(SynthError::infeasible("ORDER BY", "empty projection"))
        } else {
            Ok(rng.random_range(1..=projection.value_exp_count))
        }
    };

    match mode {
        OrderByMode::None => Ok(String::new()),
        OrderByMode::Asc => Ok(format!(" ORDER BY {} ASC", field(rng)?)),
        OrderByMode::Desc => Ok(format!(" ORDER BY {} DESC", field(rng)?)),
        OrderByMode::NumberAsc => Ok(format!(" ORDER BY {} ASC", position(rng)?)),
        OrderByMode::NumberDesc => Ok(format!(" ORDER BY {} DESC", position(rng)?)),
        OrderByMode::Multiple => match fields.len() {
            0 | 1 => Err(SynthError::infeasible(
                "ORDER BY",
                "multiple ordering needs at least two fields",
            )),
            2 => Ok(format!(" ORDER BY {} ASC, {} DESC", fields[0], fields[1])),
            n => {
                let count = rng.random_range(1..=n / 2);
                let chosen = random::pick_unique(fields, count, rng)
                    .ok_or_else(|| SynthError::ExhaustedSample("ORDER BY fields".into()))?;
                let terms: Vec<String> = chosen
                    .iter()
                    .map(|f| {
                        let direction = random::pick(&DIRECTIONS, rng).copied().unwrap_or("ASC");
                        format!("{} {}", f, direction)
                    })
                    .collect();
                Ok(format!(" ORDER BY {}", terms.join(", ")))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;

    fn projection(fields: &[&str]) -> Projection {
        Projection {
            text: String::new(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            value_exp_count: fields.len(),
            alias_types: Default::default(),
        }
    }

    #[test]
    fn test_two_fields_order_fixed() {
        let mut rng = seeded(81);
        let order = build_order_by(&projection(&["a", "b"]), OrderByMode::Multiple, &mut rng).unwrap();
        assert_eq!(order, " ORDER BY a ASC, b DESC");
    }

    #[test]
    fn test_multiple_needs_two_fields() {
        let mut rng = seeded(82);
        let err = build_order_by(&projection(&["a"]), OrderByMode::Multiple, &mut rng).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_positions_in_range() {
        let mut rng = seeded(83);
        for _ in 0..30 {
            let order = build_order_by(&projection(&["a", "b", "c"]), OrderByMode::NumberDesc, &mut rng)
                .unwrap();
            let n: usize = order
                .trim_start_matches(" ORDER BY ")
                .trim_end_matches(" DESC")
                .parse()
                .unwrap();
            assert!((1..=3).contains(&n));
        }
    }

    #[test]
    fn test_large_projection_orders_subset() {
        let mut rng = seeded(84);
        let fields = ["a", "b", "c", "d", "e"];
        for _ in 0..30 {
            let order = build_order_by(&projection(&fields), OrderByMode::Multiple, &mut rng).unwrap();
            let terms = order.trim_start_matches(" ORDER BY ").split(", ").count();
            assert!((1..=2).contains(&terms), "{}", order);
        }
    }

    #[test]
    fn test_none_is_empty() {
        let mut rng = seeded(85);
        assert_eq!(build_order_by(&projection(&[]), OrderByMode::None, &mut rng).unwrap(), "");
    }
}
