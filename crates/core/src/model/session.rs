use serde::{Deserialize, Serialize};

/// Lifecycle of a single student's exam session.
///
/// `Loading → Active → Submitting → Submitted`, with `Locked` reachable from
/// `Active` when the timer expires or the violation threshold is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Loading,
    Active,
    Locked,
    Submitting,
    Submitted,
}

impl SessionState {
    /// Whether answers may still be edited.
    #[must_use]
    pub fn accepts_answers(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the navigation cursor may move.
    #[must_use]
    pub fn allows_navigation(self) -> bool {
        matches!(self, Self::Active | Self::Locked)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Submitted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Locked => "locked",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockReason {
    TimeExpired,
    IntegrityExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_sessions_accept_answers() {
        assert!(SessionState::Active.accepts_answers());
        for state in [
            SessionState::Loading,
            SessionState::Locked,
            SessionState::Submitting,
            SessionState::Submitted,
        ] {
            assert!(!state.accepts_answers(), "{state}");
        }
    }

    #[test]
    fn navigation_survives_the_lock_but_not_submission() {
        assert!(SessionState::Active.allows_navigation());
        assert!(SessionState::Locked.allows_navigation());
        assert!(!SessionState::Loading.allows_navigation());
        assert!(!SessionState::Submitting.allows_navigation());
        assert!(!SessionState::Submitted.allows_navigation());
        assert!(SessionState::Submitted.is_terminal());
        assert!(!SessionState::Submitting.is_terminal());
    }
}
