//! Clinical episode state.
//!
//! An episode aggregates everything observed about one bout of illness
//! within the health-system memory window: reports inside the window OR
//! into the open episode, a report after the window closes flushes the old
//! episode to monitoring and opens a new one.

use serde::{Deserialize, Serialize};
use simclock::SimTime;

use crate::ClinicalEvent;

/// Bit-field of clinical state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EpisodeState(u32);

impl EpisodeState {
    pub const NONE: EpisodeState = EpisodeState(0);
    /// Any fever episode.
    pub const SICK: EpisodeState = EpisodeState(1);
    /// Fever caused by malaria.
    pub const MALARIA: EpisodeState = EpisodeState(1 << 1);
    /// Severe malaria or coincident severe illness.
    pub const COMPLICATED: EpisodeState = EpisodeState(1 << 2);
    /// A second case within the health-system memory.
    pub const SECOND_CASE: EpisodeState = EpisodeState(1 << 3);
    /// Non-malaria fever.
    pub const NM_FEVER: EpisodeState = EpisodeState(1 << 4);
    /// The episode was managed in hospital.
    pub const IN_HOSPITAL: EpisodeState = EpisodeState(1 << 5);
    /// Death directly attributed to malaria.
    pub const DIRECT_DEATH: EpisodeState = EpisodeState(1 << 6);
    /// Survival with sequelae.
    pub const SEQUELAE: EpisodeState = EpisodeState(1 << 7);
    /// Full recovery.
    pub const RECOVERY: EpisodeState = EpisodeState(1 << 8);

    pub fn contains(self, other: EpisodeState) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: EpisodeState) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EpisodeState {
    type Output = EpisodeState;
    fn bitor(self, rhs: EpisodeState) -> EpisodeState {
        EpisodeState(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for EpisodeState {
    fn bitor_assign(&mut self, rhs: EpisodeState) {
        self.0 |= rhs.0;
    }
}

/// The open episode of one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Start of the open episode; `never` when none is open.
    start: SimTime,
    state: EpisodeState,
}

impl Default for Episode {
    fn default() -> Self {
        Episode {
            start: SimTime::never(),
            state: EpisodeState::NONE,
        }
    }
}

impl Episode {
    pub fn new() -> Self {
        Episode::default()
    }

    pub fn start(&self) -> SimTime {
        self.start
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    /// Whether a report at `now` falls within the open episode's window.
    pub fn covers(&self, now: SimTime, memory: SimTime) -> bool {
        !self.start.is_never() && self.start + memory >= now
    }

    /// Fold a new report into the episode, flushing the previous episode to
    /// `events` if the window has closed.
    pub fn report(
        &mut self,
        now: SimTime,
        memory: SimTime,
        state: EpisodeState,
        events: &mut Vec<ClinicalEvent>,
    ) {
        if self.covers(now, memory) {
            self.state |= state;
        } else {
            self.flush(events);
            self.start = now;
            self.state = state;
        }
    }

    /// Close the open episode, reporting its aggregate state.
    pub fn flush(&mut self, events: &mut Vec<ClinicalEvent>) {
        if !self.start.is_never() && !self.state.is_empty() {
            events.push(ClinicalEvent::EpisodeEnd { state: self.state });
        }
        self.start = SimTime::never();
        self.state = EpisodeState::NONE;
    }
}
