//! Routing decision.
//!
//! One pure function maps a presence snapshot to a closed set of decisions.
//! Call sites match on [`RouteDecision`] and later on [`RouteOutcome`]; they
//! never re-derive block or presence state themselves.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// Opaque connection target for a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route(pub u64);

/// Presence snapshot for one user, valid for one routing attempt only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceInfo {
    /// Whether the user has a live connection
    pub online: bool,
    /// Registered push route, if any
    pub route: Option<Route>,
    /// Senders whose messages this user has blocked
    pub blocked_by: BTreeSet<UserId>,
}

impl PresenceInfo {
    /// Online at `route`, nobody blocked.
    pub fn online(route: Route) -> Self {
        Self { online: true, route: Some(route), blocked_by: BTreeSet::new() }
    }

    /// Offline, nobody blocked.
    pub fn offline() -> Self {
        Self::default()
    }
}

/// Why routing is being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// First attempt or timed retry: trust the online flag
    Normal,
    /// Presence just changed to online: push to the route even if the
    /// snapshot has not caught up yet
    PresenceTriggered,
}

/// What to do with one (message, recipient) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Recipient blocked the sender: persist nothing, report success
    Blocked,
    /// Push directly to the route
    Direct(Route),
    /// Persist and wait
    Offline,
}

/// Decide how to route a message from `sender` given the recipient snapshot.
///
/// Block state always wins, so messages queued before a block took effect are
/// still suppressed when they are re-routed.
pub fn decide(sender: UserId, recipient: &PresenceInfo, mode: RoutingMode) -> RouteDecision {
    if recipient.blocked_by.contains(&sender) {
        return RouteDecision::Blocked;
    }

    match (recipient.route, mode) {
        (Some(route), RoutingMode::PresenceTriggered) => RouteDecision::Direct(route),
        (Some(route), RoutingMode::Normal) if recipient.online => RouteDecision::Direct(route),
        _ => RouteDecision::Offline,
    }
}

/// Result of acting on a [`RouteDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Suppressed because of a block
    Dropped,
    /// Push accepted; waiting for the delivery ack
    Pushed(Route),
    /// Push timed out or errored
    Failed(Route),
    /// Recipient offline; waiting for presence
    Queued,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(sender: UserId) -> PresenceInfo {
        let mut info = PresenceInfo::online(Route(1));
        info.blocked_by.insert(sender);
        info
    }

    #[test]
    fn block_wins_over_presence() {
        assert_eq!(decide(7, &blocked(7), RoutingMode::Normal), RouteDecision::Blocked);
        assert_eq!(decide(7, &blocked(7), RoutingMode::PresenceTriggered), RouteDecision::Blocked);
        assert_eq!(decide(8, &blocked(7), RoutingMode::Normal), RouteDecision::Direct(Route(1)));
    }

    #[test]
    fn offline_is_queued() {
        assert_eq!(decide(1, &PresenceInfo::offline(), RoutingMode::Normal), RouteDecision::Offline);
    }

    #[test]
    fn presence_trigger_forces_online() {
        let stale = PresenceInfo { online: false, route: Some(Route(4)), ..PresenceInfo::default() };
        assert_eq!(decide(1, &stale, RoutingMode::Normal), RouteDecision::Offline);
        assert_eq!(decide(1, &stale, RoutingMode::PresenceTriggered), RouteDecision::Direct(Route(4)));
    }

    #[test]
    fn no_route_is_offline_even_when_forced() {
        assert_eq!(
            decide(1, &PresenceInfo::offline(), RoutingMode::PresenceTriggered),
            RouteDecision::Offline
        );
    }
}
