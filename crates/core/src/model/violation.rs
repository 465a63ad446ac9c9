use serde::{Deserialize, Serialize};

/// Number of counted violations that ends a session.
pub const VIOLATION_THRESHOLD: u32 = 5;

/// Environment signal that may count against exam integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    FocusLoss,
    VisibilityHidden,
    FullscreenExit,
    CopyPaste,
    DevTools,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 5] = [
        ViolationKind::FocusLoss,
        ViolationKind::VisibilityHidden,
        ViolationKind::FullscreenExit,
        ViolationKind::CopyPaste,
        ViolationKind::DevTools,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FocusLoss => "focus-loss",
            Self::VisibilityHidden => "visibility-hidden",
            Self::FullscreenExit => "fullscreen-exit",
            Self::CopyPaste => "copy-paste",
            Self::DevTools => "dev-tools",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

/// Current violation count against the session's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationTally {
    pub count: u32,
    pub threshold: u32,
}

impl ViolationTally {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    #[must_use]
    pub fn exceeded(&self) -> bool {
        self.count >= self.threshold
    }
}

impl Default for ViolationTally {
    fn default() -> Self {
        Self::new(VIOLATION_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in ViolationKind::ALL {
            assert_eq!(ViolationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ViolationKind::parse("screenshot"), None);
    }

    #[test]
    fn tally_exceeds_at_threshold() {
        let mut tally = ViolationTally::default();
        tally.count = 4;
        assert!(!tally.exceeded());
        tally.count = 5;
        assert!(tally.exceeded());
    }
}
