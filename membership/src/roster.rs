//! The configured seed set.
//!
//! Built once from `config.csv` and never mutated (dynamic seed sets are
//! out of scope). File order is preserved — it is the canonical seed
//! ordering — and quorum is always computed over the configured count,
//! not over whichever seeds happen to be reachable.

use {
    gossipnet_wire::NodeId,
    std::collections::HashSet,
};

/// Ordered, immutable set of configured seeds.
#[derive(Debug, Clone)]
pub struct SeedRoster {
    seeds: Vec<NodeId>,
    index: HashSet<NodeId>,
}

impl SeedRoster {
    /// Build a roster from the config-file order, dropping duplicates
    /// while keeping first occurrence.
    pub fn new(seeds: Vec<NodeId>) -> Self {
        let mut index = HashSet::new();
        let seeds = seeds
            .into_iter()
            .filter(|s| index.insert(s.clone()))
            .collect();
        Self { seeds, index }
    }

    /// Number of configured seeds.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// True when no seeds are configured.
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Majority quorum over the configured count: `⌊n/2⌋ + 1`.
    pub fn quorum(&self) -> usize {
        self.seeds.len() / 2 + 1
    }

    /// Whether `id` is a configured seed.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains(id)
    }

    /// All configured seeds in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.seeds.iter()
    }

    /// Every seed except `me`, in canonical order.
    pub fn others(&self, me: &NodeId) -> Vec<NodeId> {
        self.seeds.iter().filter(|s| *s != me).cloned().collect()
    }

    /// The seeds `me` is responsible for dialing on the mesh: each pair
    /// holds exactly one TCP link, established by the lower identity.
    pub fn dial_targets(&self, me: &NodeId) -> Vec<NodeId> {
        self.seeds.iter().filter(|s| *s > me).cloned().collect()
    }
}
