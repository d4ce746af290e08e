//! Detection-state debounce engine
//!
//! Turns a raw per-frame stream of barcode sightings into discrete read
//! events. A code that stays in front of the camera emits exactly one event;
//! once it has been absent for the loss timeout it re-arms and may emit
//! again after the debounce interval has passed since its last event.
//!
//! The engine is a pure state transition function: no I/O, no locking. Its
//! state is owned by whoever drives it (the reader's background task).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Engine timing thresholds.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Minimum elapsed time since a code's last emitted event before it may
    /// emit another.
    pub debounce: Duration,
    /// Minimum elapsed time since a code was last seen before it is
    /// considered gone and re-armed.
    pub loss_timeout: Duration,
    /// Evict state for codes unseen at least this long. `None` keeps state
    /// until the engine is reset (the historical behavior).
    pub evict_idle: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            loss_timeout: Duration::from_millis(1000),
            evict_idle: None,
        }
    }
}

/// A decision that a code was freshly presented and should be reported once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEvent {
    pub code: String,
    pub at: Instant,
}

/// Visibility state for one distinct code.
#[derive(Debug)]
struct CodeState {
    /// Currently considered "being seen" (post-debounce).
    present: bool,
    /// Most recent frame in which the code was decoded.
    last_seen: Instant,
    /// Most recent read event emitted for the code.
    last_emitted: Option<Instant>,
}

/// Per-code debounce state machine.
pub struct DebounceEngine {
    settings: EngineSettings,
    states: HashMap<String, CodeState>,
}

impl DebounceEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            states: HashMap::new(),
        }
    }

    /// Feed one frame's worth of decoded codes.
    ///
    /// Returns the read events this frame produced. The result and the final
    /// state do not depend on the iteration order of `seen`; events for
    /// distinct codes within one frame carry no relative ordering guarantee.
    pub fn process_frame(&mut self, seen: &HashSet<String>, now: Instant) -> Vec<ReadEvent> {
        let mut events = Vec::new();

        // Sighting pass
        for code in seen {
            let state = self.states.entry(code.clone()).or_insert_with(|| CodeState {
                present: false,
                last_seen: now,
                last_emitted: None,
            });
            state.last_seen = now;

            if state.present {
                // Ongoing visibility, not a new read
                continue;
            }

            let armed = state
                .last_emitted
                .map_or(true, |t| now.duration_since(t) >= self.settings.debounce);
            if armed {
                state.present = true;
                state.last_emitted = Some(now);
                events.push(ReadEvent {
                    code: code.clone(),
                    at: now,
                });
            }
        }

        // Loss pass: codes absent this frame lose presence after the timeout.
        // Shorter absences are a grace period for transient decode misses.
        for (code, state) in self.states.iter_mut() {
            if seen.contains(code) {
                continue;
            }
            if state.present && now.duration_since(state.last_seen) >= self.settings.loss_timeout {
                state.present = false;
            }
        }

        if let Some(idle) = self.settings.evict_idle {
            self.states
                .retain(|_, s| s.present || now.duration_since(s.last_seen) < idle);
        }

        events
    }

    /// Discard all per-code state, as if freshly constructed.
    pub fn reset(&mut self) {
        self.states.clear();
    }

    /// Number of distinct codes currently tracked.
    pub fn tracked_codes(&self) -> usize {
        self.states.len()
    }

    /// Whether a code is currently considered present.
    pub fn is_present(&self, code: &str) -> bool {
        self.states.get(code).map_or(false, |s| s.present)
    }
}
