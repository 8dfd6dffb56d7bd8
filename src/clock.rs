use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default tempo used before the first tempo event: 120 BPM.
pub const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;
/// Resolution of the script's own MIDI clock: 8 ticks per quarter note (32nd notes).
pub const FILLY_TICKS_PER_BEAT: u64 = 8;

const MICROS_PER_SECOND: u128 = 1_000_000;

/// A tempo change taking effect at `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoEvent {
    /// MIDI tick (in `ppq` resolution) at which the tempo changes.
    pub tick: u64,
    /// Length of a quarter note in microseconds.
    pub micros_per_beat: u32,
}

impl TempoEvent {
    pub fn new(tick: u64, micros_per_beat: u32) -> Self {
        TempoEvent {
            tick,
            micros_per_beat,
        }
    }

    /// Tempo of this segment in beats per minute.
    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.micros_per_beat as f64
    }
}

/// Converts elapsed playback time into MIDI ticks using a piecewise-constant tempo map.
///
/// The generator also remembers the last FILLY tick it handed out so that a poller can
/// feed the engine a one-shot, non-negative delta on each poll.
#[derive(Debug, Clone, PartialEq)]
pub struct TickGenerator {
    tempo_map: Vec<TempoEvent>,
    ppq: u32,
    last_delivered: u64,
}

impl TickGenerator {
    /// Creates a generator for a sequence with `ppq` ticks per quarter note.
    ///
    /// The tempo map is sorted by tick. When it is empty, or its first event starts after
    /// tick 0, a default 120 BPM event is inserted at tick 0. Events with a zero tempo are
    /// rejected.
    ///
    /// # Arguments
    ///
    /// * `ppq` - Pulses per quarter note of the MIDI sequence. Must be non-zero.
    /// * `tempo_map` - Tempo events in any order.
    pub fn new(ppq: u32, mut tempo_map: Vec<TempoEvent>) -> Result<Self, ConfigError> {
        if ppq == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ppq",
                reason: "must be greater than zero".to_string(),
            });
        }
        if tempo_map.iter().any(|e| e.micros_per_beat == 0) {
            return Err(ConfigError::InvalidValue {
                field: "tempo_map",
                reason: "micros_per_beat must be greater than zero".to_string(),
            });
        }
        tempo_map.sort_by_key(|e| e.tick);
        if tempo_map.first().map(|e| e.tick > 0).unwrap_or(true) {
            tempo_map.insert(0, TempoEvent::new(0, DEFAULT_MICROS_PER_BEAT));
        }
        Ok(TickGenerator {
            tempo_map,
            ppq,
            last_delivered: 0,
        })
    }

    /// A generator with a single constant tempo.
    pub fn constant(ppq: u32, micros_per_beat: u32) -> Result<Self, ConfigError> {
        Self::new(ppq, vec![TempoEvent::new(0, micros_per_beat)])
    }

    pub fn ppq(&self) -> u32 {
        self.ppq
    }

    pub fn tempo_map(&self) -> &[TempoEvent] {
        &self.tempo_map
    }

    /// Returns the MIDI tick reached after `elapsed_seconds` of playback.
    ///
    /// Negative or non-finite inputs are treated as zero.
    pub fn calculate_tick_from_time(&self, elapsed_seconds: f64) -> u64 {
        let micros = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
            (elapsed_seconds * 1_000_000.0).round() as u128
        } else {
            0
        };
        self.tick_at_micros(micros)
    }

    /// Same as [`calculate_tick_from_time`](Self::calculate_tick_from_time), exact to the microsecond.
    pub fn calculate_tick_from_duration(&self, elapsed: Duration) -> u64 {
        self.tick_at_micros(elapsed.as_micros())
    }

    /// Walks the tempo segments.
    ///
    /// Time is kept scaled by `ppq` so that `remaining / micros_per_beat` is a tick count
    /// and segment boundaries compare exactly: a segment of `n` ticks costs
    /// `n * micros_per_beat` in that unit.
    fn tick_at_micros(&self, micros: u128) -> u64 {
        let mut remaining = micros * self.ppq as u128;
        for (i, event) in self.tempo_map.iter().enumerate() {
            let per_tick = event.micros_per_beat as u128;
            let Some(next) = self.tempo_map.get(i + 1) else {
                return event.tick + (remaining / per_tick) as u64;
            };
            let segment_ticks = (next.tick - event.tick) as u128;
            let segment_cost = segment_ticks * per_tick;
            if remaining < segment_cost {
                return event.tick + (remaining / per_tick) as u64;
            }
            remaining -= segment_cost;
        }
        0
    }

    /// Converts a MIDI tick into the script's 32nd-note clock, rounding down.
    pub fn filly_tick(&self, midi_tick: u64) -> u64 {
        filly_tick_from_midi(midi_tick, self.ppq)
    }

    /// FILLY tick reached after `elapsed_seconds` of playback.
    pub fn calculate_filly_tick(&self, elapsed_seconds: f64) -> u64 {
        self.filly_tick(self.calculate_tick_from_time(elapsed_seconds))
    }

    /// Last FILLY tick handed out by [`poll`](Self::poll).
    pub fn last_delivered_tick(&self) -> u64 {
        self.last_delivered
    }

    /// Returns how many FILLY ticks elapsed since the previous poll and marks them delivered.
    ///
    /// Never negative: if the playback position moves backwards the delta is zero and the
    /// delivered tick is kept.
    pub fn poll(&mut self, elapsed: Duration) -> u64 {
        let current = self.filly_tick(self.calculate_tick_from_duration(elapsed));
        let delta = current.saturating_sub(self.last_delivered);
        self.last_delivered = self.last_delivered.max(current);
        delta
    }

    /// Forgets the delivered position, for a restarted sequence.
    pub fn reset(&mut self) {
        self.last_delivered = 0;
    }
}

/// `midi_tick * 8 / ppq` with floor division.
pub fn filly_tick_from_midi(midi_tick: u64, ppq: u32) -> u64 {
    if ppq == 0 {
        return 0;
    }
    ((midi_tick as u128 * FILLY_TICKS_PER_BEAT as u128) / ppq as u128) as u64
}

/// Frame-clock helper: ticks elapsed at `frame_rate` Hz over `elapsed`.
pub fn frames_in(elapsed: Duration, frame_rate: u32) -> u64 {
    (elapsed.as_micros() * frame_rate as u128 / MICROS_PER_SECOND) as u64
}

#[cfg(test)]
mod tests;
