//! Issue lifecycle status.
//!
//! Each variant's discriminant matches the seed data order (1-based) in the
//! `issue_statuses` lookup table. Transitions only ever move forward:
//! `waiting_for_attention -> got_the_attention -> resolved`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status ID.
            pub fn from_id(id: StatusId) -> Result<Self, CoreError> {
                match id {
                    $( $val => Ok(Self::$variant), )+
                    other => Err(CoreError::UnknownStatus(other.to_string())),
                }
            }

            /// Stable wire name.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(CoreError::UnknownStatus(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Issue lifecycle status.
    IssueStatus {
        WaitingForAttention = 1 => "waiting_for_attention",
        GotTheAttention = 2 => "got_the_attention",
        Resolved = 3 => "resolved",
    }
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 3] = [
        IssueStatus::WaitingForAttention,
        IssueStatus::GotTheAttention,
        IssueStatus::Resolved,
    ];

    /// Open issues are still candidates for merging.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Resolved)
    }

    /// A transition is valid only when it moves strictly forward.
    pub fn can_transition_to(self, next: IssueStatus) -> bool {
        next.id() > self.id()
    }

    /// Validate `self -> next`, returning the new status on success.
    pub fn transition_to(self, next: IssueStatus) -> Result<IssueStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl Default for IssueStatus {
    fn default() -> Self {
        Self::WaitingForAttention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn ids_match_seed_order() {
        assert_eq!(IssueStatus::WaitingForAttention.id(), 1);
        assert_eq!(IssueStatus::GotTheAttention.id(), 2);
        assert_eq!(IssueStatus::Resolved.id(), 3);
    }

    #[test]
    fn from_id_round_trips() {
        for status in IssueStatus::ALL {
            assert_eq!(IssueStatus::from_id(status.id()).unwrap(), status);
        }
        assert!(IssueStatus::from_id(9).is_err());
    }

    #[test]
    fn forward_transitions_allowed() {
        use IssueStatus::*;
        assert!(WaitingForAttention.can_transition_to(GotTheAttention));
        assert!(WaitingForAttention.can_transition_to(Resolved));
        assert!(GotTheAttention.can_transition_to(Resolved));
    }

    #[test]
    fn resolved_cannot_reopen() {
        let result = IssueStatus::Resolved.transition_to(IssueStatus::WaitingForAttention);
        assert_matches!(
            result,
            Err(CoreError::InvalidTransition {
                from: IssueStatus::Resolved,
                to: IssueStatus::WaitingForAttention,
            })
        );
    }

    #[test]
    fn self_transition_rejected() {
        for status in IssueStatus::ALL {
            assert!(status.transition_to(status).is_err());
        }
    }

    #[test]
    fn backward_transition_rejected() {
        assert!(IssueStatus::GotTheAttention
            .transition_to(IssueStatus::WaitingForAttention)
            .is_err());
    }

    #[test]
    fn only_resolved_is_closed() {
        assert!(IssueStatus::WaitingForAttention.is_open());
        assert!(IssueStatus::GotTheAttention.is_open());
        assert!(!IssueStatus::Resolved.is_open());
    }

    #[test]
    fn parse_wire_names() {
        assert_eq!(
            "got_the_attention".parse::<IssueStatus>().unwrap(),
            IssueStatus::GotTheAttention
        );
        assert!("closed".parse::<IssueStatus>().is_err());
    }
}
