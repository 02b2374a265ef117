use serde::{Deserialize, Serialize};

/// Lamport logical clock, one per process (customer or branch).
///
/// The counter never decreases. Every outgoing request carries the value
/// returned by [`LamportClock::tick_on_send`]; every inbound call applies
/// [`LamportClock::tick_on_receive`] exactly once before touching state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LamportClock {
    time: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        LamportClock { time: 0 }
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn tick_on_send(&mut self) -> u64 {
        self.time += 1;
        self.time
    }

    pub fn tick_on_receive(&mut self, incoming: u64) -> u64 {
        self.time = self.time.max(incoming) + 1;
        self.time
    }
}
