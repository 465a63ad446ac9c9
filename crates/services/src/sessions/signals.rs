use exam_core::model::ViolationKind;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 64;

/// A signal from the host environment that a session reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Connectivity { online: bool },
    Violation(ViolationKind),
}

/// Fan-out of host signals to every running session.
///
/// Sessions subscribe when they start and drop their receiver once submitted
/// or closed, so a finished session stops reacting to the environment.
#[derive(Debug, Clone)]
pub struct EnvironmentFeed {
    tx: broadcast::Sender<HostSignal>,
}

impl Default for EnvironmentFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentFeed {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Deliver a signal; returns how many sessions received it.
    pub fn publish(&self, signal: HostSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn go_online(&self) -> usize {
        self.publish(HostSignal::Connectivity { online: true })
    }

    pub fn go_offline(&self) -> usize {
        self.publish(HostSignal::Connectivity { online: false })
    }

    pub fn violation(&self, kind: ViolationKind) -> usize {
        self.publish(HostSignal::Violation(kind))
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostSignal> {
        self.tx.subscribe()
    }

    /// Sessions currently listening.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
