// Take composer - Building a comp take from regions of other takes

use crate::sequence::MidiList;
use crate::sequencer::timeline::BeatRange;
use crate::store::ids;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CompError {
    #[error("no comp regions given")]
    NoRegions,

    #[error("comp region {0} is empty")]
    EmptyRegion(usize),

    #[error("comp region uses take {index} but there are {num_takes} takes")]
    InvalidTake { index: usize, num_takes: usize },
}

/// A beat range taken from one take
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompRegion {
    pub range: BeatRange,
    pub take_index: usize,
}

impl CompRegion {
    pub fn new(range: BeatRange, take_index: usize) -> Self {
        Self { range, take_index }
    }
}

/// Splits regions so none overlap, later regions win. Result is in beat order.
fn normalise(regions: &[CompRegion]) -> Vec<CompRegion> {
    let mut segments: Vec<CompRegion> = Vec::new();

    for region in regions {
        let mut remaining = Vec::with_capacity(segments.len() + 1);
        for segment in segments {
            if !segment.range.overlaps(&region.range) {
                remaining.push(segment);
                continue;
            }
            if segment.range.start < region.range.start {
                remaining.push(CompRegion::new(
                    BeatRange::new(segment.range.start, region.range.start),
                    segment.take_index,
                ));
            }
            if segment.range.end > region.range.end {
                remaining.push(CompRegion::new(
                    BeatRange::new(region.range.end, segment.range.end),
                    segment.take_index,
                ));
            }
        }
        remaining.push(*region);
        segments = remaining;
    }

    segments.sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
    segments
}

/// Builds a comp list in its own store
///
/// Each region contributes the events of its take that start inside it.
/// Notes running past the region end are cut there, so no note from one take
/// overlaps the next region.
pub fn build_comp(takes: &[MidiList], regions: &[CompRegion]) -> Result<MidiList, CompError> {
    if regions.is_empty() {
        return Err(CompError::NoRegions);
    }
    for (i, region) in regions.iter().enumerate() {
        if region.take_index >= takes.len() {
            return Err(CompError::InvalidTake {
                index: region.take_index,
                num_takes: takes.len(),
            });
        }
        if region.range.is_empty() {
            return Err(CompError::EmptyRegion(i));
        }
    }

    let comp = MidiList::new();
    comp.set_midi_channel(takes[regions[0].take_index].midi_channel(), None);
    comp.set_comp_list(true, None);

    for segment in normalise(regions) {
        let take = &takes[segment.take_index];
        let range = segment.range;

        for note in take.notes().iter().filter(|n| range.contains(n.start_beat())) {
            let length = note.end_beat().min(range.end) - note.start_beat();
            let id = comp.add_note(note.note_number(), note.start_beat(), length, note.velocity(), note.colour(), None);
            if note.is_muted() {
                comp.store().set_property(id, ids::NOTE_MUTE, true, None);
            }
        }

        for event in take.controller_events().iter().filter(|e| range.contains(e.beat_position())) {
            comp.add_controller_event(
                event.controller_type(),
                event.beat_position(),
                event.controller_value(),
                event.metadata(),
                None,
            );
        }

        for event in take.sysex_events().iter().filter(|e| range.contains(e.beat_position())) {
            comp.add_sysex_event(event.data(), event.beat_position(), None);
        }
    }

    Ok(comp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::timeline::{BeatDuration, BeatPosition};

    fn beats(b: f64) -> BeatPosition {
        BeatPosition::from_beats(b)
    }

    fn len(b: f64) -> BeatDuration {
        BeatDuration::from_beats(b)
    }

    fn take(notes: &[(u8, f64, f64)]) -> MidiList {
        let list = MidiList::new();
        for &(pitch, start, length) in notes {
            list.add_note(pitch, beats(start), len(length), 100, 0, None);
        }
        list
    }

    #[test]
    fn test_comp_truncates_at_region_end() {
        let a = take(&[(60, 0.0, 1.0), (62, 6.0, 4.0)]);
        let b = take(&[(70, 7.0, 2.0), (72, 8.0, 1.0)]);

        let comp = build_comp(
            &[a, b],
            &[
                CompRegion::new(BeatRange::between(0.0, 8.0), 0),
                CompRegion::new(BeatRange::between(8.0, 16.0), 1),
            ],
        )
        .unwrap();

        let spans: Vec<_> = comp
            .notes()
            .iter()
            .map(|n| (n.note_number(), n.start_beat().in_beats(), n.end_beat().in_beats()))
            .collect();
        assert_eq!(spans, vec![(60, 0.0, 1.0), (62, 6.0, 8.0), (72, 8.0, 9.0)]);
        assert!(comp.is_comp_list());
    }

    #[test]
    fn test_later_regions_win() {
        let a = take(&[(60, 1.0, 1.0), (62, 5.0, 1.0)]);
        let b = take(&[(70, 3.0, 1.0), (72, 5.0, 1.0)]);

        let comp = build_comp(
            &[a, b],
            &[
                CompRegion::new(BeatRange::between(0.0, 8.0), 0),
                CompRegion::new(BeatRange::between(2.0, 4.0), 1),
            ],
        )
        .unwrap();

        let pitches: Vec<_> = comp.notes().iter().map(|n| n.note_number()).collect();
        assert_eq!(pitches, vec![60, 70, 62]);
    }

    #[test]
    fn test_comp_copies_controllers() {
        let a = take(&[]);
        a.add_controller_event(7, beats(1.0), 100, 0, None);
        a.add_controller_event(7, beats(9.0), 100, 0, None);

        let comp = build_comp(&[a], &[CompRegion::new(BeatRange::between(0.0, 4.0), 0)]).unwrap();
        assert_eq!(comp.num_controller_events(), 1);
    }

    #[test]
    fn test_invalid_regions() {
        let takes = [take(&[])];
        assert_eq!(build_comp(&takes, &[]).unwrap_err(), CompError::NoRegions);
        assert_eq!(
            build_comp(&takes, &[CompRegion::new(BeatRange::between(0.0, 4.0), 3)]).unwrap_err(),
            CompError::InvalidTake { index: 3, num_takes: 1 }
        );
        assert_eq!(
            build_comp(&takes, &[CompRegion::new(BeatRange::between(2.0, 2.0), 0)]).unwrap_err(),
            CompError::EmptyRegion(0)
        );
    }
}
