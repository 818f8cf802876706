// src/types.rs

use std::str::FromStr;

use serde::Deserialize;

/// What to do with the containers and network of a task once it is over.
///
/// Configured separately for runs that fail and runs that succeed.
///
/// - `Cleanup`: stop and remove everything that was created (default).
/// - `DontCleanup`: leave created containers behind so they can be inspected,
///   and print the commands needed to remove them later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupBehaviour {
    Cleanup,
    DontCleanup,
}

impl Default for CleanupBehaviour {
    fn default() -> Self {
        CleanupBehaviour::Cleanup
    }
}

impl FromStr for CleanupBehaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cleanup" => Ok(CleanupBehaviour::Cleanup),
            "dont-cleanup" | "dont_cleanup" => Ok(CleanupBehaviour::DontCleanup),
            other => Err(format!(
                "invalid cleanup behaviour: {other} (expected \"cleanup\" or \"dont-cleanup\")"
            )),
        }
    }
}
