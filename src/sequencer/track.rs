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

//! Looping event tracks.

use crate::error::{Error, Result};
use crate::graph::SourceId;

/// What an event carries to its source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Payload {
    /// Nothing. Used for callback triggers.
    #[default]
    None,
    /// A note number for voices.
    Note(u8),
}

/// A scheduled occurrence inside a track's loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Position in beats from the start of the loop.
    pub position: f64,
    /// Length in beats.
    pub duration: f64,
    pub payload: Payload,
}

/// An event that falls inside a beat window, with the absolute beat of this occurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueEvent<'a> {
    pub beat: f64,
    pub event: &'a Event,
}

/// A loop of events bound to a single source.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: String,
    source: SourceId,
    length_beats: f64,
    /// Sorted by position. Equal positions keep insertion order.
    events: Vec<Event>,
}

impl Track {
    pub fn new(id: &str, source: SourceId, length_beats: f64) -> Result<Self> {
        if !length_beats.is_finite() || length_beats <= 0.0 {
            return Err(Error::Range(format!(
                "track length must be positive, got {}",
                length_beats
            )));
        }
        Ok(Self {
            id: id.to_string(),
            source,
            length_beats,
            events: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn length(&self) -> f64 {
        self.length_beats
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Inserts an event, keeping position order.
    pub fn add_event(&mut self, position: f64, duration: f64, payload: Payload) -> Result<()> {
        if !position.is_finite() || position < 0.0 || position >= self.length_beats {
            return Err(Error::Range(format!(
                "event position {} is outside the {} beat loop of track '{}'",
                position, self.length_beats, self.id
            )));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::Range(format!(
                "event duration must be positive, got {}",
                duration
            )));
        }

        let index = self.events.partition_point(|e| e.position <= position);
        self.events.insert(
            index,
            Event {
                position,
                duration,
                payload,
            },
        );
        Ok(())
    }

    /// Removes every event. The binding and loop length stay.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Yields every occurrence in `[start, end)` in beat order, wrapping at the loop length.
    pub fn due_events(&self, start: f64, end: f64) -> DueEvents<'_> {
        DueEvents::new(&self.events, self.length_beats, start, end)
    }
}

/// Iterator over the occurrences of a track's events inside a beat window.
///
/// Each loop iteration `k` places an event at `k * length + position`. Walking
/// iterations in order covers windows that straddle the loop boundary, and
/// contiguous windows never share an occurrence. Does not allocate.
pub struct DueEvents<'a> {
    events: &'a [Event],
    length: f64,
    start: f64,
    end: f64,
    iteration: f64,
    last_iteration: f64,
    index: usize,
}

impl<'a> DueEvents<'a> {
    fn new(events: &'a [Event], length: f64, start: f64, end: f64) -> Self {
        let (iteration, last_iteration) = if events.is_empty() || end <= start {
            (1.0, 0.0)
        } else {
            ((start / length).floor(), (end / length).floor())
        };
        Self {
            events,
            length,
            start,
            end,
            iteration,
            last_iteration,
            index: 0,
        }
    }
}

impl<'a> Iterator for DueEvents<'a> {
    type Item = DueEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.iteration <= self.last_iteration {
            let Some(event) = self.events.get(self.index) else {
                self.iteration += 1.0;
                self.index = 0;
                continue;
            };
            self.index += 1;

            let beat = self.iteration * self.length + event.position;
            if beat < self.start {
                continue;
            }
            if beat >= self.end {
                // Later events and iterations are all past the window.
                self.iteration = self.last_iteration + 1.0;
                return None;
            }
            return Some(DueEvent { beat, event });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(length: f64) -> Track {
        Track::new("test", SourceId::new(1), length).unwrap()
    }

    fn due(track: &Track, start: f64, end: f64) -> Vec<f64> {
        track.due_events(start, end).map(|d| d.beat).collect()
    }

    #[test]
    fn test_add_event_validation() {
        let mut track = track(4.0);

        assert!(track.add_event(0.0, 1.0, Payload::None).is_ok());
        assert!(matches!(
            track.add_event(4.0, 1.0, Payload::None),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            track.add_event(-0.5, 1.0, Payload::None),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            track.add_event(1.0, 0.0, Payload::None),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            track.add_event(1.0, -1.0, Payload::None),
            Err(Error::Range(_))
        ));
        assert_eq!(track.events().len(), 1);
    }

    #[test]
    fn test_invalid_length() {
        assert!(Track::new("t", SourceId::new(1), 0.0).is_err());
        assert!(Track::new("t", SourceId::new(1), f64::INFINITY).is_err());
    }

    #[test]
    fn test_events_sorted_and_stable() {
        let mut track = track(4.0);
        track.add_event(2.0, 1.0, Payload::Note(1)).unwrap();
        track.add_event(1.0, 1.0, Payload::Note(2)).unwrap();
        track.add_event(2.0, 1.0, Payload::Note(3)).unwrap();
        track.add_event(0.0, 1.0, Payload::Note(4)).unwrap();

        let payloads: Vec<Payload> = track.events().iter().map(|e| e.payload).collect();
        assert_eq!(
            payloads,
            vec![
                Payload::Note(4),
                Payload::Note(2),
                Payload::Note(1),
                Payload::Note(3)
            ]
        );
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut track = track(4.0);
        for beat in 0..4 {
            track.add_event(beat as f64, 0.1, Payload::None).unwrap();
        }

        track.clear();
        assert!(track.is_empty());
        track.clear();
        assert!(track.is_empty());
        assert_eq!(track.length(), 4.0);
        assert_eq!(track.source(), SourceId::new(1));
    }

    #[test]
    fn test_due_events_in_window() {
        let mut track = track(4.0);
        track.add_event(0.0, 1.0, Payload::None).unwrap();
        track.add_event(1.0, 1.0, Payload::None).unwrap();
        track.add_event(2.5, 1.0, Payload::None).unwrap();

        assert_eq!(due(&track, 0.0, 1.0), vec![0.0]);
        assert_eq!(due(&track, 0.5, 3.0), vec![1.0, 2.5]);
        assert_eq!(due(&track, 1.0, 1.0), Vec::<f64>::new());
    }

    #[test]
    fn test_due_events_wrap_loop_boundary() {
        let mut track = track(4.0);
        track.add_event(0.0, 1.0, Payload::None).unwrap();
        track.add_event(3.9, 0.1, Payload::None).unwrap();

        assert_eq!(due(&track, 3.5, 4.5), vec![3.9, 4.0]);
        assert_eq!(due(&track, 7.95, 8.05), vec![8.0]);
    }

    #[test]
    fn test_event_near_loop_end_fires_once() {
        let length = 4.0;
        let epsilon = 1e-3;
        let mut track = track(length);
        track.add_event(length - epsilon, 0.5, Payload::None).unwrap();

        for block in [0.001, 0.007, 0.0213, 0.3, 1.7, 3.0] {
            let mut start = 0.0;
            let mut fired = Vec::new();
            while start < 2.0 * length {
                let end = start + block;
                fired.extend(due(&track, start, end));
                start = end;
            }
            assert_eq!(fired.len(), 2, "block size {}", block);
            assert!((fired[0] - (length - epsilon)).abs() < 1e-9);
            assert!((fired[1] - (2.0 * length - epsilon)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_window_longer_than_loop() {
        let mut track = track(1.0);
        track.add_event(0.5, 0.1, Payload::None).unwrap();

        assert_eq!(due(&track, 0.0, 3.0), vec![0.5, 1.5, 2.5]);
    }

    #[test]
    fn test_empty_track_has_nothing_due() {
        let track = track(4.0);
        assert_eq!(track.due_events(0.0, 100.0).count(), 0);
    }
}
