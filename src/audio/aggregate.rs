// Aggregate (multi-output) device description and rate negotiation
//
// Member order is significant: index 0 is the clock source and the drift
// anchor, every later member is drift-compensated against it.

use serde::{Deserialize, Serialize};

use super::devices::types::SampleRateRange;

/// One sub-device of the aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMember {
    pub uid: String,
    pub drift_compensation: bool,
}

/// Everything the OS needs to build the aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDescription {
    pub uid: String,
    pub name: String,
    pub members: Vec<AggregateMember>,
    /// Stacked aggregates play the same signal on every member
    pub is_stacked: bool,
    pub is_private: bool,
}

impl AggregateDescription {
    /// Multi-output aggregate over `member_uids` in the given order
    pub fn multi_output(uid: &str, name: &str, member_uids: &[String]) -> Self {
        let members = member_uids
            .iter()
            .enumerate()
            .map(|(index, member_uid)| AggregateMember {
                uid: member_uid.clone(),
                drift_compensation: index > 0,
            })
            .collect();

        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            members,
            is_stacked: true,
            is_private: false,
        }
    }

    /// Clock source and drift anchor
    pub fn clock_master_uid(&self) -> Option<&str> {
        self.members.first().map(|m| m.uid.as_str())
    }

    pub fn member_uids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.uid.clone()).collect()
    }
}

/// First preferred rate that every device supports, if any.
///
/// A device advertising no ranges supports nothing, so any such device makes
/// the negotiation fail and sharing proceeds without forcing a rate.
pub fn negotiate_sample_rate(
    preferred_rates: &[f64],
    device_ranges: &[Vec<SampleRateRange>],
) -> Option<f64> {
    if device_ranges.is_empty() {
        return None;
    }

    preferred_rates.iter().copied().find(|rate| {
        device_ranges
            .iter()
            .all(|ranges| ranges.iter().any(|range| range.contains(*rate)))
    })
}
