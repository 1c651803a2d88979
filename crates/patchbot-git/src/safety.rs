//! Whether a change may be built in the primary workspace.

use patchbot_core::staging::SafetyRules;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Safe,
    /// Paths outside the allow-list.
    Unsafe { offending: Vec<String> },
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafetyVerdict::Safe)
    }
}

/// A change is safe when every path it touches is allow-listed.
pub fn classify<S: AsRef<str>>(paths: &[S], rules: &SafetyRules) -> SafetyVerdict {
    let offending: Vec<String> = paths
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !rules.allows(p))
        .map(str::to_string)
        .collect();

    if offending.is_empty() {
        SafetyVerdict::Safe
    } else {
        SafetyVerdict::Unsafe { offending }
    }
}
