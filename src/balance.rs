//! # Channel balance and lifecycle events.
//!
//! These are the payloads the event trigger monitors consume and that scheduled
//! triggers carry into workflow inputs. They serialize to camelCase JSON, which is
//! the form handed to the workflow executor.
//!
//! Per-mille helpers compute balance ratios with integer arithmetic only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::NodeId;

/// Internal channel identifier.
pub type ChannelId = i64;

/// Point-in-time balance of one channel as seen by one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub remote_node_id: NodeId,
    pub capacity: i64,
    pub local_balance: i64,
    pub remote_balance: i64,
}

/// A channel's balance changed (or was synthesized on bootstrap).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBalanceEvent {
    pub event_time: DateTime<Utc>,
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub capacity: i64,
    pub local_balance: i64,
    pub remote_balance: i64,
    pub local_balance_per_mille_ratio: i64,
    pub aggregated_local_balance: i64,
    pub aggregated_local_balance_per_mille_ratio: i64,
}

impl ChannelBalanceEvent {
    /// Builds an event from a channel state, without aggregates.
    pub fn from_state(node_id: NodeId, state: &ChannelState, event_time: DateTime<Utc>) -> Self {
        Self {
            event_time,
            node_id,
            channel_id: state.channel_id,
            capacity: state.capacity,
            local_balance: state.local_balance,
            remote_balance: state.remote_balance,
            local_balance_per_mille_ratio: per_mille_ratio(state.local_balance, state.capacity),
            aggregated_local_balance: 0,
            aggregated_local_balance_per_mille_ratio: 0,
        }
    }
}

/// Channel lifecycle transition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEventKind {
    Open,
    Closed,
    Active,
    Inactive,
    PendingOpen,
    FullyResolved,
}

/// A channel opened, closed, or changed activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEvent {
    pub event_time: DateTime<Utc>,
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub kind: ChannelEventKind,
}

/// Difference between `base` and `amt` in per-mille of the larger side.
///
/// Symmetric in its arguments. The multiplication happens before the division so
/// that small deltas are not truncated to zero.
///
/// ```
/// use nodevisor::balance::delta_per_mille;
///
/// assert_eq!(delta_per_mille(1_000, 900), 100);
/// assert_eq!(delta_per_mille(900, 1_000), 100);
/// assert_eq!(delta_per_mille(5, 5), 0);
/// ```
pub fn delta_per_mille(base: u64, amt: u64) -> u64 {
    let (larger, smaller) = if base >= amt { (base, amt) } else { (amt, base) };
    if larger == 0 {
        return 0;
    }
    let diff = u128::from(larger - smaller);
    (diff * 1_000 / u128::from(larger)) as u64
}

/// `part` as per-mille of `whole`; `0` when `whole` is not positive.
pub fn per_mille_ratio(part: i64, whole: i64) -> i64 {
    if whole <= 0 {
        return 0;
    }
    (i128::from(part) * 1_000 / i128::from(whole)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_per_mille_keeps_small_deltas() {
        assert_eq!(delta_per_mille(1_000_000, 999_000), 1);
        assert_eq!(delta_per_mille(0, 0), 0);
        assert_eq!(delta_per_mille(0, 10), 1_000);
        assert_eq!(delta_per_mille(u64::MAX, 0), 1_000);
    }

    #[test]
    fn test_per_mille_ratio() {
        assert_eq!(per_mille_ratio(250, 1_000), 250);
        assert_eq!(per_mille_ratio(1, 3), 333);
        assert_eq!(per_mille_ratio(10, 0), 0);
    }

    #[test]
    fn test_balance_event_serializes_camel_case() {
        let state = ChannelState {
            channel_id: 11,
            remote_node_id: 4,
            capacity: 2_000,
            local_balance: 500,
            remote_balance: 1_500,
        };
        let ev = ChannelBalanceEvent::from_state(1, &state, Utc::now());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["channelId"], 11);
        assert_eq!(json["localBalancePerMilleRatio"], 250);
    }
}
