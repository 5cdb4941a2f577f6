//! TCP port allocation for test servers.
//!
//! The allocator is a pure function of the configured range and the set of
//! ports already claimed by live servers; the caller owns that set. A port
//! returned here is only probed, not held, so the server spawn must treat a
//! subsequent bind failure as retryable.

use std::collections::BTreeSet;
use std::net::TcpListener;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SetupError};

/// Inclusive port range, validated on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    lo: u16,
    hi: u16,
}

impl PortRange {
    pub fn new(lo: u16, hi: u16) -> Result<Self> {
        if lo == 0 || lo > hi {
            return Err(SetupError::InvalidPortRange { lo, hi });
        }
        Ok(PortRange { lo, hi })
    }

    pub fn lo(&self) -> u16 {
        self.lo
    }

    pub fn hi(&self) -> u16 {
        self.hi
    }
}

/// Find the lowest bindable port in `range` that is not in `exclude`.
///
/// Candidates are scanned in ascending order so allocation is deterministic
/// for reproducible test logs. The probe listener is dropped before
/// returning.
pub fn allocate(range: PortRange, exclude: &BTreeSet<u16>) -> Result<u16> {
    for port in range.lo..=range.hi {
        if exclude.contains(&port) {
            continue;
        }
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            tracing::debug!(port, "allocated test port");
            return Ok(port);
        }
    }
    Err(SetupError::NoPortAvailable { lo: range.lo, hi: range.hi })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_and_zero_ranges() {
        assert!(PortRange::new(9000, 8000).is_err());
        assert!(PortRange::new(0, 100).is_err());
        assert!(PortRange::new(8600, 8600).is_ok());
    }
}
