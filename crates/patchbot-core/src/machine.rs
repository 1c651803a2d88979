//! Machine identity vectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered description of the environment a report was produced on,
/// most general first: OS family, OS version, CPU arch, kernel release, hostname.
///
/// Only ever compared with [`MachineIdentity::compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineIdentity(Vec<String>);

impl MachineIdentity {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Describe the host this process runs on.
    pub fn detect() -> Self {
        let os_release = std::fs::read_to_string("/etc/os-release").unwrap_or_default();
        let field = |key: &str| -> Option<String> {
            os_release.lines().find_map(|line| {
                line.strip_prefix(key)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(|value| value.trim_matches('"').to_string())
            })
        };
        let proc_value = |path: &str| -> String {
            std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        };

        Self(vec![
            field("NAME").unwrap_or_else(|| std::env::consts::OS.to_string()),
            field("VERSION_ID").unwrap_or_else(|| "unknown".to_string()),
            std::env::consts::ARCH.to_string(),
            proc_value("/proc/sys/kernel/osrelease"),
            proc_value("/proc/sys/kernel/hostname"),
        ])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Component-wise difference against `other`, looking at the first
    /// `depth` components only. A trailing `true` flags a length mismatch.
    pub fn compare(&self, other: &MachineIdentity, depth: usize) -> Vec<bool> {
        let a = &self.0[..self.0.len().min(depth)];
        let b = &other.0[..other.0.len().min(depth)];
        let mut diff: Vec<bool> = a.iter().zip(b).map(|(x, y)| x != y).collect();
        if a.len() != b.len() {
            diff.push(true);
        }
        diff
    }
}

impl fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ubuntu() -> MachineIdentity {
        MachineIdentity::new(["Ubuntu", "14.04", "i686", "3.13.0-40-generic", "arando"])
    }

    #[test]
    fn test_identical_machines_are_all_false() {
        assert_eq!(ubuntu().compare(&ubuntu(), 5), vec![false; 5]);
    }

    #[test]
    fn test_differences_are_positional() {
        let other = MachineIdentity::new(["Ubuntu", "16.04", "i686", "4.4.0", "arando"]);
        assert_eq!(
            ubuntu().compare(&other, 5),
            vec![false, true, false, true, false]
        );
    }

    #[test]
    fn test_depth_truncates() {
        let other = MachineIdentity::new(["Ubuntu", "14.04", "i686", "4.4.0", "elsewhere"]);
        assert_eq!(ubuntu().compare(&other, 3), vec![false; 3]);
    }

    #[test]
    fn test_length_mismatch_flag() {
        let short = MachineIdentity::new(["Ubuntu", "14.04"]);
        assert_eq!(ubuntu().compare(&short, 5), vec![false, false, true]);
    }

    #[test]
    fn test_detect_has_five_components() {
        assert_eq!(MachineIdentity::detect().parts().len(), 5);
    }

    #[test]
    fn test_display_joins_with_colons() {
        assert_eq!(
            MachineIdentity::new(["a", "b"]).to_string(),
            "a:b".to_string()
        );
    }
}
