//! Particle ID ranges and the 2-range pair selectors used to route a pair
//! of particles to the interaction responsible for it.

/// A set of particle IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRange {
    /// Every particle.
    All,
    /// Half-open contiguous range `[start, end)`.
    Span { start: u32, end: u32 },
    /// Explicit list.
    List(Vec<u32>),
}

impl IdRange {
    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        match self {
            IdRange::All => true,
            IdRange::Span { start, end } => id >= *start && id < *end,
            IdRange::List(ids) => ids.contains(&id),
        }
    }

    /// Number of IDs, or `None` for `All` (depends on the particle count).
    pub fn count(&self) -> Option<usize> {
        match self {
            IdRange::All => None,
            IdRange::Span { start, end } => Some(end.saturating_sub(*start) as usize),
            IdRange::List(ids) => Some(ids.len()),
        }
    }
}

/// A selector over unordered particle pairs. The interaction registry asks
/// each interaction's selector in order; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairRange {
    /// Matches every pair.
    All,
    /// Matches when both particles are in the given range.
    Single(IdRange),
    /// Matches when one particle is in the first range and the other in the
    /// second.
    Pair(IdRange, IdRange),
    /// Explicit unordered pair list (used for bonds).
    List(Vec<(u32, u32)>),
}

impl PairRange {
    pub fn covers(&self, i: u32, j: u32) -> bool {
        match self {
            PairRange::All => true,
            PairRange::Single(r) => r.contains(i) && r.contains(j),
            PairRange::Pair(a, b) => {
                (a.contains(i) && b.contains(j)) || (a.contains(j) && b.contains(i))
            }
            PairRange::List(pairs) => {
                let key = if i <= j { (i, j) } else { (j, i) };
                pairs
                    .iter()
                    .any(|&(a, b)| (a.min(b), a.max(b)) == key)
            }
        }
    }
}
