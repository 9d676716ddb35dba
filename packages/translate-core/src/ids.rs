//! Human-memorable session identifier allocation (component A).
//!
//! Produces IDs of the form `adjective-noun-NNN`, e.g. `quiet-harbor-482`.
//! Collision-resistance relies on the word-list size (64 x 64) multiplied by
//! a three-digit numeric suffix (1000 combinations), giving roughly 4.1M
//! distinct IDs; the allocator retries against the session store on
//! collision rather than relying on the space being collision-free.

use rand::Rng;

use crate::error::{PipelineError, PipelineResult};
use crate::protocol_constants::ID_ALLOCATION_MAX_RETRIES;

const ADJECTIVES: &[&str] = &[
    "quiet", "bright", "amber", "swift", "gentle", "bold", "calm", "eager",
    "fuzzy", "hidden", "lucky", "mellow", "noble", "proud", "rapid", "sunny",
    "vivid", "warm", "brave", "clear", "dusty", "fresh", "golden", "happy",
    "icy", "jolly", "keen", "lively", "misty", "neat", "old", "plain",
    "quick", "rare", "sharp", "tidy", "upper", "vast", "wild", "young",
    "ancient", "azure", "coral", "dense", "early", "faint", "grand", "humble",
    "inner", "jade", "kind", "lean", "mighty", "nimble", "ornate", "patient",
    "quaint", "royal", "slim", "tall", "urban", "violet", "wise", "zesty",
];

const NOUNS: &[&str] = &[
    "harbor", "summit", "meadow", "forest", "river", "canyon", "valley",
    "island", "desert", "glacier", "plateau", "prairie", "reef", "ridge",
    "shore", "tundra", "bay", "cliff", "delta", "dune", "fjord", "grove",
    "hill", "lagoon", "marsh", "oasis", "peak", "pond", "spring", "stream",
    "trail", "woods", "falcon", "heron", "otter", "sparrow", "badger",
    "lynx", "raven", "swan", "cedar", "maple", "willow", "birch", "pine",
    "aspen", "elm", "oak", "fern", "comet", "ember", "lantern", "compass",
    "anchor", "beacon", "drift", "echo", "horizon", "meridian", "cove",
    "nova", "orbit", "pulse", "zenith",
];

/// Generates a fresh `adjective-noun-NNN` ID and retries against `exists`
/// (a session-store lookup) until a non-colliding one is found, up to
/// [`ID_ALLOCATION_MAX_RETRIES`] attempts.
pub fn new_id<F>(mut exists: F) -> PipelineResult<String>
where
    F: FnMut(&str) -> bool,
{
    let mut rng = rand::rng();
    for _ in 0..ID_ALLOCATION_MAX_RETRIES {
        let candidate = generate_candidate(&mut rng);
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }
    Err(PipelineError::Fatal(format!(
        "identifier allocator exhausted {ID_ALLOCATION_MAX_RETRIES} retries"
    )))
}

fn generate_candidate(rng: &mut impl Rng) -> String {
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let suffix = rng.random_range(0..1000);
    format!("{adjective}-{noun}-{suffix:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_well_formed_slug() {
        let id = new_id(|_| false).unwrap();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(NOUNS.contains(&parts[1]));
        assert_eq!(parts[2].len(), 3);
    }

    #[test]
    fn retries_on_collision_and_eventually_succeeds() {
        let mut seen = HashSet::new();
        seen.insert("quiet-harbor-000".to_string());
        let id = new_id(|candidate| seen.contains(candidate)).unwrap();
        assert_ne!(id, "quiet-harbor-000");
    }

    #[test]
    fn surfaces_fatal_when_every_candidate_collides() {
        let result = new_id(|_| true);
        assert!(matches!(result, Err(PipelineError::Fatal(_))));
    }

    #[test]
    fn ids_are_distinct_across_many_calls() {
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let id = new_id(|candidate| seen.contains(candidate)).unwrap();
            assert!(seen.insert(id));
        }
    }
}
