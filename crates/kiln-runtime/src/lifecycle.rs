use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a virtualizer instance.
///
/// Kiln itself only drives `Uninitialized -> Initialized -> Running`; the
/// later states belong to whoever manages the running VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VirtState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Destroyed,
}

impl fmt::Display for VirtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtState::Uninitialized => write!(f, "uninitialized"),
            VirtState::Initialized => write!(f, "initialized"),
            VirtState::Running => write!(f, "running"),
            VirtState::Stopped => write!(f, "stopped"),
            VirtState::Destroyed => write!(f, "destroyed"),
        }
    }
}

pub fn validate_transition(from: VirtState, to: VirtState) -> Result<(), RuntimeError> {
    let valid = matches!(
        (from, to),
        (VirtState::Uninitialized, VirtState::Initialized)
            | (VirtState::Initialized | VirtState::Stopped, VirtState::Running)
            | (VirtState::Running, VirtState::Stopped)
            | (
                VirtState::Uninitialized
                    | VirtState::Initialized
                    | VirtState::Running
                    | VirtState::Stopped,
                VirtState::Destroyed
            )
    );

    if valid {
        Ok(())
    } else {
        Err(RuntimeError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
