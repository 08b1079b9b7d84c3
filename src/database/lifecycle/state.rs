use serde::Serialize;
use std::fmt;

/// Lifecycle of a managed database within one process
///
/// Schema changes happen only in `Provisioning` and `Upgrading`.
/// `Verifying` is read-only. `Restoring` always ends in `Closed`, since the
/// restored file has to be opened again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Provisioning,
    Open,
    Upgrading,
    Verifying,
    Restoring,
    Closed,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn allows(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, next) {
            (Uninitialized | Closed, Provisioning | Upgrading | Open) => true,
            (Provisioning | Upgrading, Open | Closed) => true,
            (Uninitialized | Open, Closed) => true,
            (Open, Verifying) => true,
            (Verifying, Open) => true,
            (Uninitialized | Open | Closed, Restoring) => true,
            (Restoring, Closed) => true,
            _ => false,
        }
    }

    pub fn mutates_schema(self) -> bool {
        matches!(
            self,
            LifecycleState::Provisioning | LifecycleState::Upgrading
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Open => "open",
            LifecycleState::Upgrading => "upgrading",
            LifecycleState::Verifying => "verifying",
            LifecycleState::Restoring => "restoring",
            LifecycleState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}
