//! Commit authority
//!
//! Hands out commit versions. The WAL is the source of truth: on startup
//! the authority is restored from the highest durable commit, and a version
//! is marked committed only after its COMMIT record has been appended.
//! The authority lives under the engine's commit lock.

use thiserror::Error;

use crate::mvcc::Version;

#[derive(Debug, Default)]
pub struct CommitAuthority {
    highest: Version,
}

impl CommitAuthority {
    /// Authority for a fresh engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Authority resuming after the highest recovered commit
    pub fn from_replayed_commit(version: Version) -> Self {
        Self { highest: version }
    }

    /// Advance past a commit found during replay.
    pub fn observe_replayed_commit(&mut self, version: Version) -> Result<(), CommitAuthorityError> {
        if version <= self.highest {
            return Err(CommitAuthorityError::NonMonotonic {
                observed: version,
                highest: self.highest,
            });
        }
        self.highest = version;
        Ok(())
    }

    /// Version the next commit will carry.
    pub fn next_version(&self) -> Version {
        self.highest.next()
    }

    /// Record that `version` is durable in the WAL.
    pub fn mark_committed(&mut self, version: Version) -> Result<(), CommitAuthorityError> {
        let expected = self.highest.next();
        if version != expected {
            return Err(CommitAuthorityError::OutOfOrder {
                attempted: version,
                expected,
            });
        }
        self.highest = version;
        Ok(())
    }

    /// Highest committed version (`Version::ZERO` if none)
    pub fn highest(&self) -> Version {
        self.highest
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitAuthorityError {
    #[error("non-monotonic commit version: observed {observed} but highest is {highest}")]
    NonMonotonic { observed: Version, highest: Version },

    #[error("out of order commit: attempted {attempted} but expected {expected}")]
    OutOfOrder { attempted: Version, expected: Version },
}
