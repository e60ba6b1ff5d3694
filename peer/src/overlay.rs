//! Preferential-attachment neighbor selection.
//!
//! The peer weights every candidate from the seeds' union peer list by
//! `1 + degree_estimate`, where the degree estimate is how many seed
//! lists the candidate appeared in — hubs are seen by more seeds, so
//! they attract more new edges and the overlay converges on a scale-free
//! shape. The neighbor count itself is a Pareto draw, clamped to
//! `[1, |U|]`.
//!
//! All sampling runs against an RNG seeded from the peer's own identity,
//! so a given peer makes the same choices from the same union list on
//! every run.

use {
    gossipnet_wire::NodeId,
    rand::{rngs::StdRng, Rng, SeedableRng},
};

/// The deterministic RNG a peer uses for every overlay decision.
pub fn rng_for(identity: &NodeId) -> StdRng {
    StdRng::seed_from_u64(identity.rng_seed())
}

/// Draw the neighbor count: `clamp(⌈Pareto(alpha, x_min)⌉, 1, universe)`.
///
/// Inverse-transform sampling: `x = x_min / U^(1/alpha)` for
/// `U ∈ (0, 1]`.
pub fn neighbor_count<R: Rng>(rng: &mut R, alpha: f64, x_min: f64, universe: usize) -> usize {
    if universe == 0 {
        return 0;
    }
    let u: f64 = 1.0 - rng.gen::<f64>(); // (0, 1]
    let draw = x_min / u.powf(1.0 / alpha);
    (draw.ceil() as usize).clamp(1, universe)
}

/// Sample `k` distinct candidates with probability proportional to
/// `1 + degree`, without replacement.
///
/// `candidates` must be in a deterministic order (the callers sort by
/// identity) or the seeded RNG guarantees nothing.
pub fn select_neighbors<R: Rng>(
    candidates: &[(NodeId, usize)],
    k: usize,
    rng: &mut R,
) -> Vec<NodeId> {
    let mut pool: Vec<(NodeId, f64)> = candidates
        .iter()
        .map(|(id, degree)| (id.clone(), 1.0 + *degree as f64))
        .collect();
    let mut chosen = Vec::with_capacity(k.min(pool.len()));

    while chosen.len() < k && !pool.is_empty() {
        let total: f64 = pool.iter().map(|(_, w)| w).sum();
        let mut roll = rng.gen::<f64>() * total;
        let mut picked = pool.len() - 1;
        for (i, (_, w)) in pool.iter().enumerate() {
            if roll < *w {
                picked = i;
                break;
            }
            roll -= w;
        }
        chosen.push(pool.swap_remove(picked).0);
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> NodeId {
        NodeId::new("127.0.0.1", port)
    }

    fn union(entries: &[(u16, usize)]) -> Vec<(NodeId, usize)> {
        entries.iter().map(|(p, d)| (peer(*p), *d)).collect()
    }

    #[test]
    fn test_selection_is_deterministic_per_identity() {
        let me = peer(6001);
        let candidates = union(&[(6002, 1), (6003, 2), (6004, 0), (6005, 3), (6006, 1)]);
        let a = select_neighbors(&candidates, 3, &mut rng_for(&me));
        let b = select_neighbors(&candidates, 3, &mut rng_for(&me));
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_different_identities_use_different_streams() {
        let candidates = union(&[
            (7001, 1),
            (7002, 2),
            (7003, 0),
            (7004, 5),
            (7005, 1),
            (7006, 3),
            (7007, 0),
            (7008, 2),
        ]);
        let a = select_neighbors(&candidates, 4, &mut rng_for(&peer(6001)));
        let b = select_neighbors(&candidates, 4, &mut rng_for(&peer(6002)));
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 4);
        assert_ne!(peer(6001).rng_seed(), peer(6002).rng_seed());
    }

    #[test]
    fn test_no_replacement_and_bounds() {
        let candidates = union(&[(6002, 0), (6003, 0), (6004, 0)]);
        let mut rng = rng_for(&peer(6001));
        let chosen = select_neighbors(&candidates, 10, &mut rng);
        assert_eq!(chosen.len(), 3);
        let mut unique = chosen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_empty_union() {
        let mut rng = rng_for(&peer(6001));
        assert_eq!(neighbor_count(&mut rng, 1.5, 2.0, 0), 0);
        assert!(select_neighbors(&[], 3, &mut rng).is_empty());
    }

    #[test]
    fn test_neighbor_count_bounds() {
        let mut rng = rng_for(&peer(6001));
        for universe in 1..=20 {
            for _ in 0..200 {
                let k = neighbor_count(&mut rng, 1.5, 2.0, universe);
                assert!((1..=universe).contains(&k));
            }
        }
    }

    #[test]
    fn test_pareto_draw_at_least_x_min() {
        // x_min = 2 means the ceiling is at least 2 whenever the
        // universe allows it.
        let mut rng = rng_for(&peer(6001));
        for _ in 0..500 {
            assert!(neighbor_count(&mut rng, 1.5, 2.0, 100) >= 2);
        }
    }

    #[test]
    fn test_weights_favor_hubs() {
        // One candidate with overwhelming degree should be picked first
        // almost always; verify for our deterministic seed.
        let candidates = union(&[(6002, 0), (6003, 10_000), (6004, 0)]);
        let chosen = select_neighbors(&candidates, 1, &mut rng_for(&peer(6001)));
        assert_eq!(chosen, vec![peer(6003)]);
    }
}
