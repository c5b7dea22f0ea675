//! Replacement Policy
//!
//! Victim selection shared by the TLB and the frame pool. A policy is a
//! plain value passed in at construction; `select_victim` is a pure
//! function of the candidate slots.
//!
//! Both policies take the first free slot if one exists. Among occupied
//! slots LRU picks the smallest `last_used`, FIFO the smallest
//! `first_time`. Ties go to the lowest index.

use crate::types::Tick;

/// Replacement strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// First in, first out
    Fifo,
}

/// What a policy needs to know about one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Slot holds a live mapping
    pub occupied: bool,
    pub last_used: Tick,
    pub first_time: Tick,
}

impl Candidate {
    pub const FREE: Self = Self {
        occupied: false,
        last_used: 0,
        first_time: 0,
    };

    pub const fn occupied(last_used: Tick, first_time: Tick) -> Self {
        Self {
            occupied: true,
            last_used,
            first_time,
        }
    }
}

impl ReplacementPolicy {
    /// Ordering key for an occupied slot
    fn key(&self, candidate: &Candidate) -> Tick {
        match self {
            ReplacementPolicy::Lru => candidate.last_used,
            ReplacementPolicy::Fifo => candidate.first_time,
        }
    }

    /// Index of the slot to reuse, or `None` when there are no slots at all
    pub fn select_victim<I>(&self, candidates: I) -> Option<usize>
    where
        I: IntoIterator<Item = Candidate>,
    {
        let mut best: Option<(usize, Tick)> = None;
        for (index, candidate) in candidates.into_iter().enumerate() {
            if !candidate.occupied {
                return Some(index);
            }
            let key = self.key(&candidate);
            match best {
                Some((_, best_key)) if best_key <= key => {}
                _ => best = Some((index, key)),
            }
        }
        best.map(|(index, _)| index)
    }
}
