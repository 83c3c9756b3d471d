//! LIMIT stage.

use crate::spec::LimitMode;
use rand::{Rng, RngCore};

pub fn build_limit(mode: LimitMode, rng: &mut dyn RngCore) -> String {
    match mode {
        LimitMode::None => String::new(),
        LimitMode::WithoutOffset => format!(" LIMIT {}", rng.random_range(1..=10u32)),
        LimitMode::WithOffset => {
            let limit = rng.random_range(1..=10u32);
            let offset = rng.random_range(1..=10u32);
            format!(" LIMIT {} OFFSET {}", limit, offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded;

    #[test]
    fn test_limit_shapes() {
        let mut rng = seeded(91);
        assert_eq!(build_limit(LimitMode::None, &mut rng), "");
        for _ in 0..20 {
            let limit = build_limit(LimitMode::WithOffset, &mut rng);
            let parts: Vec<&str> = limit.split_whitespace().collect();
            assert_eq!(parts[0], "LIMIT");
            assert_eq!(parts[2], "OFFSET");
            let n: u32 = parts[1].parse().unwrap();
            let m: u32 = parts[3].parse().unwrap();
            assert!((1..=10).contains(&n) && (1..=10).contains(&m));
        }
    }
}
