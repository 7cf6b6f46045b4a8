//! At-most-one in-flight action, with a queue of depth one

/// What happens to an utterance that arrives while an action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Keep one utterance to run next; drop any beyond it
    Queue,
    /// Drop every utterance that arrives while busy
    Drop,
}

impl BusyPolicy {
    /// Parse a configured policy name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "queue" => Some(Self::Queue),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }
}

/// Decision for one offered utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Start it now
    Accepted,
    /// Run it after the current action
    Queued,
    /// Discard it
    Dropped,
}

/// Admission control for the dispatch loop
#[derive(Debug)]
pub struct ActionGate {
    policy: BusyPolicy,
    busy: bool,
    queued: Option<String>,
}

impl ActionGate {
    /// An idle gate
    #[must_use]
    pub const fn new(policy: BusyPolicy) -> Self {
        Self {
            policy,
            busy: false,
            queued: None,
        }
    }

    /// Offer an utterance
    ///
    /// On `Accepted` the caller must start it and later call `complete`.
    pub fn offer(&mut self, utterance: &str) -> Admission {
        if !self.busy {
            self.busy = true;
            return Admission::Accepted;
        }

        if self.policy == BusyPolicy::Queue && self.queued.is_none() {
            self.queued = Some(utterance.to_string());
            return Admission::Queued;
        }

        Admission::Dropped
    }

    /// The running action finished
    ///
    /// Returns the queued utterance, which the caller must start next; the
    /// gate stays busy in that case.
    pub fn complete(&mut self) -> Option<String> {
        let next = self.queued.take();
        self.busy = next.is_some();
        next
    }

    /// True while an action is running
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// True if an utterance is waiting
    #[must_use]
    pub const fn has_queued(&self) -> bool {
        self.queued.is_some()
    }
}
