//! Scanner configuration and state types.

use serde::{Deserialize, Serialize};

/// Configuration for one asset's block scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Chain slug used in logs (e.g. `"bitcoin"`).
    pub chain: String,
    /// Upper bound on concurrently in-flight extraction workers. Caps the
    /// per-transaction RPC fan-out against the node.
    pub max_extracting_size: usize,
    /// How many of the most recent heights to defensively re-scan after the
    /// main loop, in case a previous run lost notifications mid-flight.
    /// 0 disables the pass.
    pub rescan_last_blocks: u64,
    /// Interval between scheduled scan invocations (milliseconds).
    pub poll_interval_ms: u64,
    /// Unscan-record reason prefixes the sweeper treats as permanent and
    /// prunes instead of retrying.
    pub permanent_reason_prefixes: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chain: "bitcoin".into(),
            max_extracting_size: 15,
            rescan_last_blocks: 0,
            poll_interval_ms: 10_000,
            permanent_reason_prefixes: vec!["transaction not found".into()],
        }
    }
}

/// Runtime state of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    /// Not yet started.
    Idle,
    /// Initializing the cursor just below the chain head.
    Bootstrapping,
    /// Walking heights forward.
    Scanning,
    /// Repairing a detected fork.
    RollingBack,
    /// Cursor has reached the chain head.
    CaughtUp,
    /// Background task terminated.
    Stopped,
}

impl std::fmt::Display for ScannerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::Scanning => write!(f, "scanning"),
            Self::RollingBack => write!(f, "rolling-back"),
            Self::CaughtUp => write!(f, "caught-up"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = ScannerConfig::default();
        assert_eq!(cfg.max_extracting_size, 15);
        assert_eq!(cfg.rescan_last_blocks, 0);
        assert_eq!(cfg.poll_interval_ms, 10_000);
        assert_eq!(cfg.permanent_reason_prefixes, vec!["transaction not found"]);
    }

    #[test]
    fn state_display() {
        assert_eq!(ScannerState::RollingBack.to_string(), "rolling-back");
        assert_eq!(ScannerState::CaughtUp.to_string(), "caught-up");
    }
}
