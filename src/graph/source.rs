// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Graph input nodes: audio voices and beat callbacks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::samples::Voice;
use crate::sequencer::Payload;

/// Global atomic counter for generating unique source IDs.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a voice or callback trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub const fn new(id: u64) -> Self {
        SourceId(id)
    }

    /// Allocates a process-wide unique id.
    pub fn next() -> Self {
        SourceId(SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source #{}", self.0)
    }
}

/// A due event, resolved against the current block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    /// Frame within the current block where the event lands.
    pub delay_frames: usize,
    pub duration_frames: usize,
    /// Absolute beat of this occurrence.
    pub beat: f64,
    pub payload: Payload,
}

/// A source that produces no audio and reports beats to an observer.
pub struct CallbackTrigger {
    on_fire: Box<dyn FnMut(u64) + Send>,
}

impl CallbackTrigger {
    pub fn new(on_fire: impl FnMut(u64) + Send + 'static) -> Self {
        Self {
            on_fire: Box::new(on_fire),
        }
    }

    /// Invokes the observer with `beat_index`. The observer must not block.
    pub fn trigger(&mut self, beat_index: u64) {
        (self.on_fire)(beat_index);
    }
}

impl fmt::Debug for CallbackTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTrigger").finish_non_exhaustive()
    }
}

/// Everything that can be bound to a track and connected into the graph.
#[derive(Debug)]
pub enum Source {
    Voice(Voice),
    Callback(CallbackTrigger),
}

impl Source {
    pub fn trigger(&mut self, trigger: &Trigger) {
        match self {
            Source::Voice(voice) => voice.schedule(trigger.delay_frames, 0, trigger.duration_frames),
            Source::Callback(callback) => callback.trigger(trigger.beat.floor() as u64),
        }
    }

    /// Adds this source's next block into `out`. Callbacks add nothing.
    pub fn mix_into(&mut self, out: &mut [f32], channels: usize) {
        if let Source::Voice(voice) = self {
            voice.mix_into(out, channels);
        }
    }
}

/// Lock-free beat observer for UI threads.
#[derive(Debug, Default)]
pub struct BeatCounter {
    /// Last fired beat plus one; zero until the first fire.
    last_beat: AtomicU64,
    fires: AtomicU64,
}

impl BeatCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a callback that records beats into this counter.
    pub fn observer(self: &Arc<Self>) -> impl FnMut(u64) + Send + 'static {
        let counter = self.clone();
        move |beat| {
            counter.last_beat.store(beat + 1, Ordering::Release);
            counter.fires.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn last_beat(&self) -> Option<u64> {
        match self.last_beat.load(Ordering::Acquire) {
            0 => None,
            beat => Some(beat - 1),
        }
    }

    pub fn fires(&self) -> u64 {
        self.fires.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::samples::SampleBuffer;

    #[test]
    fn test_source_ids_are_unique() {
        let a = SourceId::next();
        let b = SourceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_callback_fires_with_beat_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut source = Source::Callback(CallbackTrigger::new(move |beat| {
            sink.lock().unwrap().push(beat)
        }));

        source.trigger(&Trigger {
            delay_frames: 0,
            duration_frames: 10,
            beat: 3.0,
            payload: Payload::None,
        });
        source.trigger(&Trigger {
            delay_frames: 0,
            duration_frames: 10,
            beat: 4.75,
            payload: Payload::None,
        });

        assert_eq!(*seen.lock().unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_callback_produces_no_audio() {
        let mut source = Source::Callback(CallbackTrigger::new(|_| {}));
        source.trigger(&Trigger {
            delay_frames: 0,
            duration_frames: 10,
            beat: 0.0,
            payload: Payload::None,
        });
        let mut out = vec![0.25; 8];

        source.mix_into(&mut out, 2);

        assert_eq!(out, vec![0.25; 8]);
    }

    #[test]
    fn test_voice_source_schedules_at_delay() {
        let buffer = Arc::new(SampleBuffer::new(vec![1.0, 1.0], 1, 48000));
        let mut source = Source::Voice(Voice::new("tone", buffer));
        source.trigger(&Trigger {
            delay_frames: 1,
            duration_frames: 100,
            beat: 0.0,
            payload: Payload::Note(60),
        });
        let mut out = vec![0.0; 4];

        source.mix_into(&mut out, 1);

        assert_eq!(out, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_beat_counter() {
        let counter = BeatCounter::new();
        assert_eq!(counter.last_beat(), None);

        let mut observer = counter.observer();
        observer(0);
        observer(1);

        assert_eq!(counter.last_beat(), Some(1));
        assert_eq!(counter.fires(), 2);
    }
}
