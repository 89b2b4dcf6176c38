//! Global policy for deprecated-occurrence diagnostics.

use crate::kinds::Deprecation;
use serde::{Deserialize, Serialize};

/// How registrations against deprecated occurrence kinds are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningState {
    /// Never report.
    Off,
    /// Report when the deprecation asks to be reported by default.
    #[default]
    Default,
    /// Always report, and refuse the registration.
    On,
}

impl WarningState {
    /// Whether a diagnostic should be produced for this deprecation.
    pub fn print_for(self, deprecation: &Deprecation) -> bool {
        match self {
            WarningState::Off => false,
            WarningState::On => true,
            WarningState::Default => deprecation.warn_by_default,
        }
    }

    /// Whether a reported deprecation becomes a hard registration error.
    pub fn is_fatal(self) -> bool {
        self == WarningState::On
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_follows_the_deprecation() {
        let loud = Deprecation::new();
        let quiet = Deprecation::new().warn_by_default(false);

        assert!(WarningState::Default.print_for(&loud));
        assert!(!WarningState::Default.print_for(&quiet));
        assert!(WarningState::On.print_for(&quiet));
        assert!(!WarningState::Off.print_for(&loud));
    }

    #[test]
    fn only_on_is_fatal() {
        assert!(WarningState::On.is_fatal());
        assert!(!WarningState::Default.is_fatal());
        assert!(!WarningState::Off.is_fatal());
    }
}
