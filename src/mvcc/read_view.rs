//! ReadView - Stable snapshot boundary
//!
//! A read view is fixed when a transaction begins and never changes. Every
//! entry with a version above its upper bound is invisible to it.

use super::Version;

/// A stable snapshot boundary for read operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ReadView {
    read_upper_bound: Version,
}

impl ReadView {
    /// Creates a new read view with the given upper bound.
    #[inline]
    pub fn new(upper_bound: Version) -> Self {
        Self {
            read_upper_bound: upper_bound,
        }
    }

    /// A view that sees every committed version
    #[inline]
    pub fn latest() -> Self {
        Self::new(Version::new(u64::MAX))
    }

    /// Returns the highest visible version.
    #[inline]
    pub fn upper_bound(&self) -> Version {
        self.read_upper_bound
    }

    /// Returns true if an entry committed at `version` is visible
    #[inline]
    pub fn can_see(&self, version: Version) -> bool {
        version <= self.read_upper_bound
    }
}
