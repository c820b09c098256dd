//! Branch navigation gate
//!
//! Jumping to a different conversation branch changes which transcript the
//! working tree is supposed to match. When the destination entry has a
//! checkpoint, the embedder is asked what to do with the files before the
//! jump happens; navigation proceeds only after the choice is applied.

use crate::types::EntryId;

/// What to do with the working tree before navigating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationChoice {
    /// Navigate and leave the files as they are
    KeepCurrentFiles,
    /// Restore the destination entry's checkpoint first
    RestoreDestination,
    /// Abort the navigation
    Cancel,
}

/// Result of running the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Destination has no checkpoint; nothing to decide
    PassThrough,
    /// User chose to keep the current files
    KeptFiles,
    /// Destination checkpoint was restored
    Restored {
        /// Entry whose checkpoint was restored
        entry_id: EntryId,
    },
    /// Navigation was cancelled (by choice, or because the restore failed)
    Cancelled,
}

/// Embedder-supplied decision point. Called synchronously from the gate;
/// implementations typically show a prompt.
pub trait NavigationChooser: Send + Sync {
    /// Decide what happens to the working tree before jumping to
    /// `destination`, which carries checkpoint `label` in listings.
    fn choose(&self, destination: &EntryId, label: Option<&str>) -> NavigationChoice;
}

/// A chooser that always answers the same thing. Handy for non-interactive
/// embedders and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedChoice(pub NavigationChoice);

impl NavigationChooser for FixedChoice {
    fn choose(&self, _destination: &EntryId, _label: Option<&str>) -> NavigationChoice {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_choice_answers_uniformly() {
        let chooser = FixedChoice(NavigationChoice::Cancel);
        assert_eq!(
            chooser.choose(&EntryId::new("e1"), Some("U2")),
            NavigationChoice::Cancel
        );
        assert_eq!(
            chooser.choose(&EntryId::new("e2"), None),
            NavigationChoice::Cancel
        );
    }
}
