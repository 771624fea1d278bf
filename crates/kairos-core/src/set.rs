//! The [`BufferSet`] of buffer names a node reads or writes.

use std::collections::BTreeSet;
use std::fmt;

/// A set of buffer names.
///
/// Compute nodes declare their inputs ("requested") and outputs
/// ("supplied") as buffer sets. Iteration is in ascending name order, so
/// diagnostics and derived group boundaries are reproducible.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferSet {
    names: BTreeSet<String>,
}

impl BufferSet {
    /// Create an empty buffer set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert a buffer name. Returns `false` if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    /// Check whether the set contains a buffer name.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Return the union of two sets (`self | other`).
    pub fn union(&self, other: &Self) -> Self {
        Self {
            names: self.names.union(&other.names).cloned().collect(),
        }
    }

    /// Return the intersection of two sets (`self & other`).
    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            names: self.names.intersection(&other.names).cloned().collect(),
        }
    }

    /// Return the set difference (`self - other`).
    pub fn difference(&self, other: &Self) -> Self {
        Self {
            names: self.names.difference(&other.names).cloned().collect(),
        }
    }

    /// Whether the two sets share at least one name.
    pub fn intersects(&self, other: &Self) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.names.iter().any(|n| large.names.contains(n))
    }

    /// Check whether `self` is a subset of `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.names.is_subset(&other.names)
    }

    /// Returns `true` if the set contains no names.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of names in the set.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Iterate over the names in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for BufferSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for BufferSet {
    fn from(names: [S; N]) -> Self {
        names.into_iter().collect()
    }
}

impl fmt::Display for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, name) in self.names.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        f.write_str("}")
    }
}
