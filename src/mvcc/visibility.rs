//! MVCC visibility
//!
//! Given a read view `R` and a version chain ordered by ascending version,
//! the visible entry is the one with the largest version `≤ R.upper_bound`.
//! If that entry is a tombstone the key is invisible. A higher view may see
//! more, never less.

use super::{ReadView, VersionChain, Version};
use crate::content::ContentAddress;

/// Result of visibility evaluation for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityResult {
    /// The key is bound to a value committed at `version`
    Visible {
        version: Version,
        address: ContentAddress,
    },
    /// No entry within the view, or the newest one is a tombstone
    Invisible,
}

impl VisibilityResult {
    pub fn address(&self) -> Option<ContentAddress> {
        match self {
            VisibilityResult::Visible { address, .. } => Some(*address),
            VisibilityResult::Invisible => None,
        }
    }

    pub fn version(&self) -> Option<Version> {
        match self {
            VisibilityResult::Visible { version, .. } => Some(*version),
            VisibilityResult::Invisible => None,
        }
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, VisibilityResult::Visible { .. })
    }
}

/// Stateless visibility resolver.
pub struct Visibility;

impl Visibility {
    /// Evaluates visibility for a version chain given a read view.
    pub fn resolve(chain: &VersionChain, view: ReadView) -> VisibilityResult {
        match chain.visible(view) {
            Some(entry) => match entry.value.address() {
                Some(address) => VisibilityResult::Visible {
                    version: entry.version,
                    address,
                },
                None => VisibilityResult::Invisible,
            },
            None => VisibilityResult::Invisible,
        }
    }
}
