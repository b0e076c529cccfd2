//! Coarse network quality classes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{FAST_DOWNLINK_MBPS, MEDIUM_DOWNLINK_MBPS};

/// Network quality as seen by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    #[default]
    Fast,
    Medium,
    Slow,
    Offline,
}

impl NetworkQuality {
    /// Classify a downlink estimate in Mbps.
    ///
    /// An unknown estimate while online is treated as fast.
    pub fn classify(downlink_mbps: Option<f64>, online: bool) -> Self {
        if !online {
            return NetworkQuality::Offline;
        }
        match downlink_mbps {
            None => NetworkQuality::Fast,
            Some(mbps) if mbps >= FAST_DOWNLINK_MBPS => NetworkQuality::Fast,
            Some(mbps) if mbps >= MEDIUM_DOWNLINK_MBPS => NetworkQuality::Medium,
            Some(_) => NetworkQuality::Slow,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, NetworkQuality::Offline)
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkQuality::Fast => "fast",
            NetworkQuality::Medium => "medium",
            NetworkQuality::Slow => "slow",
            NetworkQuality::Offline => "offline",
        };
        f.write_str(name)
    }
}
