//! Node roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// The part a node plays in the overlay. Fixed once published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user; talks only to the mailbox servers of its bucket.
    Client,
    /// Server held in reserve with no layer position.
    IdleServer,
    /// Mailbox server.
    MbServer,
    /// Multicast-cluster member other than the leader.
    McFollower,
    /// Multicast-cluster leader (order 0 of its group).
    McLeader,
    /// Relay/shuffle server.
    RsServer,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Role; 6] = [
        Role::Client,
        Role::IdleServer,
        Role::MbServer,
        Role::McFollower,
        Role::McLeader,
        Role::RsServer,
    ];

    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::IdleServer => "idle_server",
            Role::MbServer => "mb_server",
            Role::McFollower => "mc_follower",
            Role::McLeader => "mc_leader",
            Role::RsServer => "rs_server",
        }
    }

    /// Every role except `client`.
    pub fn is_server(self) -> bool {
        self != Role::Client
    }

    /// Multicast-cluster roles, which carry a group and an order.
    pub fn is_mc_server(self) -> bool {
        matches!(self, Role::McFollower | Role::McLeader)
    }

    /// Roles that are hashed into a bucket.
    pub fn has_bucket(self) -> bool {
        matches!(self, Role::Client | Role::MbServer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| TypesError::UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).expect("serialize");
            assert_eq!(json, format!("\"{}\"", role.as_str()));
            assert_eq!(role.as_str().parse::<Role>().expect("parse"), role);
        }
    }

    #[test]
    fn test_unknown_role() {
        assert!("mc_boss".parse::<Role>().is_err());
    }

    #[test]
    fn test_predicates() {
        assert!(!Role::Client.is_server());
        assert!(Role::IdleServer.is_server());
        assert!(Role::McLeader.is_mc_server());
        assert!(!Role::RsServer.is_mc_server());
        assert!(Role::MbServer.has_bucket());
        assert!(!Role::McFollower.has_bucket());
    }
}
