//! Sampling helpers shared by the clause stages.
//!
//! Every helper takes `&mut dyn RngCore` so a single seeded generator can be
//! threaded through the whole pipeline, including orchestrator re-entry.

use rand::seq::index;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Words used for textual `IN` lists.
const WORDS: &[&str] = &[
    "apple", "banana", "cherry", "grape", "lemon", "mango", "orange", "peach", "pear", "plum",
];

/// Build the deterministic generator used for a run.
pub fn seeded(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

pub fn pick_index(len: usize, rng: &mut dyn RngCore) -> usize {
    rng.random_range(0..len)
}

/// Pick one element uniformly, `None` when the slice is empty.
pub fn pick<'a, T>(items: &'a [T], rng: &mut dyn RngCore) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[pick_index(items.len(), rng)])
    }
}

/// Pick `amount` distinct elements, `None` when there are not enough.
///
/// The result keeps the order in which elements were drawn.
pub fn pick_unique<T: Clone>(items: &[T], amount: usize, rng: &mut dyn RngCore) -> Option<Vec<T>> {
    if amount > items.len() {
        return None;
    }
    Some(
        index::sample(rng, items.len(), amount)
            .into_iter()
            .map(|i| items[i].clone())
            .collect(),
    )
}

pub fn coin(rng: &mut dyn RngCore) -> bool {
    rng.random_bool(0.5)
}

/// A single lowercase letter not present in `taken`.
pub fn fresh_letter(taken: &[String], rng: &mut dyn RngCore) -> Option<String> {
    let free: Vec<String> = ('a'..='z')
        .map(String::from)
        .filter(|l| !taken.contains(l))
        .collect();
    pick(&free, rng).cloned()
}

/// `count` quoted random words, e.g. `'apple', 'pear'`.
pub fn quoted_words(count: usize, rng: &mut dyn RngCore) -> Vec<String> {
    (0..count)
        .filter_map(|_| pick(WORDS, rng).map(|w| format!("'{}'", w)))
        .collect()
}
