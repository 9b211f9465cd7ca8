//! Fixed-capacity history buffer.
//!
//! Histories (error occurrences, pattern examples, insights) keep only the
//! newest `N` items. Cumulative counters live next to the ring on the
//! owning record, so truncation never loses a count.

use std::collections::VecDeque;

use serde::{Deserialize, Deserializer, Serialize};

/// Ring buffer that drops its oldest item once `N` items are held.
///
/// Serializes as a plain JSON array. Deserializing an over-long array keeps
/// the newest `N` items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BoundedRing<T, const N: usize> {
    items: VecDeque<T>,
}

impl<T, const N: usize> BoundedRing<T, N> {
    /// Create an empty ring.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Maximum number of retained items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Append an item, returning the evicted oldest item if the ring was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if N == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= N {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Number of retained items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the ring holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most recently pushed item.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}

impl<T, const N: usize> Default for BoundedRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> FromIterator<T> for BoundedRing<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut ring = Self::new();
        for item in iter {
            ring.push(item);
        }
        ring
    }
}

impl<'de, T, const N: usize> Deserialize<'de> for BoundedRing<T, N>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}
