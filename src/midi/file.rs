// MIDI files - Reading Standard MIDI Files
// Each track with channel events becomes one list, timestamps in beats

use crate::midi::event::MidiMessage;
use crate::midi::sequence::MidiMessageSequence;
use crate::sequence::{MidiList, NoteAutomationType};
use crate::sequencer::tempo_map::TempoChange;
use crate::sequencer::timeline::{BeatPosition, MidiChannel, Tempo, TimePosition, TimeSignature};
use midly::{MetaMessage, Smf, Timing, TrackEventKind};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum MidiFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse MIDI file: {0}")]
    Parse(#[from] midly::Error),

    #[error("Timecode-based MIDI files are not supported")]
    UnsupportedTiming,
}

/// Result of reading a file track by track
#[derive(Debug)]
pub struct MidiFileContents {
    /// One list per track that carries channel or sysex events
    pub lists: Vec<MidiList>,
    /// Tempo and time signature changes, empty when the file has none
    pub tempo_changes: Vec<TempoChange>,
    /// Position of the last event in the file
    pub song_length: BeatPosition,
}

struct ParsedTrack {
    name: Option<String>,
    events: MidiMessageSequence,
}

#[derive(Default)]
struct ParsedFile {
    tracks: Vec<ParsedTrack>,
    tempos: Vec<(f64, Tempo)>,
    time_signatures: Vec<(f64, TimeSignature)>,
    end_beat: f64,
}

fn convert_message(channel: u8, message: midly::MidiMessage) -> MidiMessage {
    let channel = MidiChannel::new(channel + 1);
    match message {
        midly::MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => MidiMessage::NoteOff {
            channel,
            note: key.as_int(),
            velocity: 0,
        },
        midly::MidiMessage::NoteOn { key, vel } => MidiMessage::NoteOn {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        midly::MidiMessage::NoteOff { key, vel } => MidiMessage::NoteOff {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        midly::MidiMessage::Aftertouch { key, vel } => MidiMessage::Aftertouch {
            channel,
            note: key.as_int(),
            pressure: vel.as_int(),
        },
        midly::MidiMessage::Controller { controller, value } => MidiMessage::ControlChange {
            channel,
            controller: controller.as_int(),
            value: value.as_int(),
        },
        midly::MidiMessage::ProgramChange { program } => MidiMessage::ProgramChange {
            channel,
            program: program.as_int(),
        },
        midly::MidiMessage::ChannelAftertouch { vel } => MidiMessage::ChannelPressure {
            channel,
            pressure: vel.as_int(),
        },
        midly::MidiMessage::PitchBend { bend } => MidiMessage::PitchBend {
            channel,
            value: bend.0.as_int(),
        },
    }
}

/// midly strips the leading F0, and the F7 is missing on split packets
fn frame_sysex(data: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(data.len() + 2);
    framed.push(0xF0);
    framed.extend_from_slice(data);
    if framed.last() != Some(&0xF7) {
        framed.push(0xF7);
    }
    framed
}

fn parse(data: &[u8]) -> Result<ParsedFile, MidiFileError> {
    let smf = Smf::parse(data)?;
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(ppq) if ppq.as_int() > 0 => ppq.as_int() as f64,
        _ => return Err(MidiFileError::UnsupportedTiming),
    };

    let mut file = ParsedFile::default();

    for track in &smf.tracks {
        let mut tick: u64 = 0;
        let mut parsed = ParsedTrack {
            name: None,
            events: MidiMessageSequence::new(),
        };

        for event in track {
            tick += event.delta.as_int() as u64;
            let beat = tick as f64 / ticks_per_beat;
            file.end_beat = file.end_beat.max(beat);

            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    parsed.events.push(beat, convert_message(channel.as_int(), message));
                }
                TrackEventKind::SysEx(bytes) => {
                    parsed.events.push(beat, MidiMessage::SysEx(frame_sysex(bytes)));
                }
                TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                    parsed.name = Some(String::from_utf8_lossy(name).into_owned());
                }
                TrackEventKind::Meta(MetaMessage::Tempo(micros_per_beat)) => {
                    let micros = micros_per_beat.as_int().max(1) as f64;
                    file.tempos.push((beat, Tempo::clamped(60_000_000.0 / micros)));
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator_power, _, _)) => {
                    if numerator > 0 && denominator_power < 8 {
                        let signature = TimeSignature::new(numerator, 1 << denominator_power);
                        file.time_signatures.push((beat, signature));
                    }
                }
                _ => {}
            }
        }

        file.tracks.push(parsed);
    }

    Ok(file)
}

fn parse_file(path: &Path) -> Result<ParsedFile, MidiFileError> {
    let data = std::fs::read(path)?;
    parse(&data)
}

impl ParsedFile {
    fn has_tempo_changes(&self) -> bool {
        let Some((_, first)) = self.tempos.iter().min_by(|a, b| a.0.total_cmp(&b.0)) else {
            return false;
        };
        self.tempos.iter().any(|(_, tempo)| tempo.bpm() != first.bpm())
    }

    /// Merges tempo and time signature events into combined changes
    fn tempo_changes(&self) -> Vec<TempoChange> {
        let mut points: BTreeMap<u64, (f64, Option<Tempo>, Option<TimeSignature>)> = BTreeMap::new();
        for (beat, tempo) in &self.tempos {
            points.entry(beat.to_bits()).or_insert((*beat, None, None)).1 = Some(*tempo);
        }
        for (beat, signature) in &self.time_signatures {
            points.entry(beat.to_bits()).or_insert((*beat, None, None)).2 = Some(*signature);
        }

        // Non-negative f64 bit patterns sort like the values
        let mut tempo = Tempo::default();
        let mut time_signature = TimeSignature::default();
        points
            .into_values()
            .map(|(beat, new_tempo, new_signature)| {
                tempo = new_tempo.unwrap_or(tempo);
                time_signature = new_signature.unwrap_or(time_signature);
                TempoChange {
                    beat: BeatPosition::from_beats(beat),
                    tempo,
                    time_signature,
                }
            })
            .collect()
    }
}

/// True when notes are spread over several MPE member channels (2-16) and
/// those channels carry their own pitch bend or pressure
pub fn looks_like_mpe_data(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let file = match parse_file(path) {
        Ok(file) => file,
        Err(err) => {
            log::warn!("could not read {}: {}", path.display(), err);
            return false;
        }
    };

    file.tracks.iter().any(|track| {
        let mut note_channels = BTreeSet::new();
        let mut expressive_channels = BTreeSet::new();

        for event in track.events.iter() {
            match event.message {
                MidiMessage::NoteOn { channel, .. } if channel.number() > 1 => {
                    note_channels.insert(channel);
                }
                MidiMessage::PitchBend { channel, .. } | MidiMessage::ChannelPressure { channel, .. }
                    if channel.number() > 1 =>
                {
                    expressive_channels.insert(channel);
                }
                _ => {}
            }
        }

        note_channels.len() > 1 && note_channels.intersection(&expressive_channels).next().is_some()
    })
}

/// True when some tempo event differs from the first one
pub fn file_has_tempo_changes(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match parse_file(path) {
        Ok(file) => file.has_tempo_changes(),
        Err(err) => {
            log::warn!("could not read {}: {}", path.display(), err);
            false
        }
    }
}

/// Reads every track into its own list
///
/// Tracks with only meta events (tempo maps, markers) produce no list. Each
/// list takes the track's name and the file name, and its channel from the
/// first channel event.
pub fn read_separate_tracks_from_file(
    path: impl AsRef<Path>,
    automation: NoteAutomationType,
) -> Result<MidiFileContents, MidiFileError> {
    let path = path.as_ref();
    let file = parse_file(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let lists = file
        .tracks
        .iter()
        .filter(|track| !track.events.is_empty())
        .map(|track| {
            let list = MidiList::new();
            list.import_with_automation(&track.events, automation, None, TimePosition::zero(), None);
            if let Some(name) = &track.name {
                list.set_imported_midi_track_name(name, None);
            }
            list.set_imported_file_name(&file_name, None);
            list
        })
        .collect::<Vec<_>>();

    log::debug!("read {} tracks from {}", lists.len(), path.display());

    Ok(MidiFileContents {
        lists,
        tempo_changes: file.tempo_changes(),
        song_length: BeatPosition::from_beats(file.end_beat),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u4, u7, u14, u15, u24, u28};
    use midly::{Format, Header, PitchBend, TrackEvent};

    fn midi(delta: u32, channel: u8, message: midly::MidiMessage) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(channel),
                message,
            },
        }
    }

    fn meta(delta: u32, message: MetaMessage<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Meta(message),
        }
    }

    fn note_on(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
        midi(delta, channel, midly::MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(100) })
    }

    fn note_off(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
        midi(delta, channel, midly::MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) })
    }

    fn write(dir: &tempfile::TempDir, name: &str, tracks: Vec<Vec<TrackEvent<'static>>>) -> std::path::PathBuf {
        let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(480))));
        smf.tracks = tracks;
        let path = dir.path().join(name);
        smf.save(&path).unwrap();
        path
    }

    #[test]
    fn test_read_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "song.mid",
            vec![
                vec![
                    meta(0, MetaMessage::Tempo(u24::new(500_000))),
                    meta(1920, MetaMessage::Tempo(u24::new(375_000))),
                    meta(0, MetaMessage::EndOfTrack),
                ],
                vec![
                    meta(0, MetaMessage::TrackName(b"Bass")),
                    note_on(0, 1, 36),
                    note_off(480, 1, 36),
                    note_on(480, 1, 38),
                    // Note-on with velocity 0 ends the note
                    midi(240, 1, midly::MidiMessage::NoteOn { key: u7::new(38), vel: u7::new(0) }),
                    meta(0, MetaMessage::EndOfTrack),
                ],
            ],
        );

        let contents = read_separate_tracks_from_file(&path, NoteAutomationType::None).unwrap();
        assert_eq!(contents.lists.len(), 1);

        let bass = &contents.lists[0];
        assert_eq!(bass.imported_midi_track_name(), "Bass");
        assert_eq!(bass.imported_file_name(), "song.mid");
        assert_eq!(bass.midi_channel().number(), 2);
        let notes: Vec<_> = bass
            .notes()
            .iter()
            .map(|n| (n.note_number(), n.start_beat().in_beats(), n.length_beats().in_beats()))
            .collect();
        assert_eq!(notes, vec![(36, 0.0, 1.0), (38, 2.0, 0.5)]);

        assert_eq!(contents.tempo_changes.len(), 2);
        assert_eq!(contents.tempo_changes[1].beat.in_beats(), 4.0);
        assert_eq!(contents.tempo_changes[1].tempo.bpm(), 160.0);
        assert_eq!(contents.song_length.in_beats(), 4.0);
        assert!(file_has_tempo_changes(&path));
        assert!(!looks_like_mpe_data(&path));
    }

    #[test]
    fn test_repeated_tempo_is_not_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "steady.mid",
            vec![
                vec![
                    meta(0, MetaMessage::Tempo(u24::new(500_000))),
                    meta(1920, MetaMessage::Tempo(u24::new(500_000))),
                    meta(0, MetaMessage::EndOfTrack),
                ],
                vec![
                    meta(960, MetaMessage::Tempo(u24::new(500_000))),
                    note_on(0, 0, 60),
                    note_off(480, 0, 60),
                    meta(0, MetaMessage::EndOfTrack),
                ],
            ],
        );
        assert!(!file_has_tempo_changes(&path));

        let changing = write(
            &dir,
            "changing.mid",
            vec![vec![
                meta(0, MetaMessage::Tempo(u24::new(500_000))),
                meta(1920, MetaMessage::Tempo(u24::new(500_000))),
                meta(1920, MetaMessage::Tempo(u24::new(400_000))),
                meta(0, MetaMessage::EndOfTrack),
            ]],
        );
        assert!(file_has_tempo_changes(&changing));
    }

    #[test]
    fn test_time_signature_carries_tempo() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "meter.mid",
            vec![vec![
                meta(0, MetaMessage::Tempo(u24::new(1_000_000))),
                meta(3840, MetaMessage::TimeSignature(3, 2, 24, 8)),
                meta(0, MetaMessage::EndOfTrack),
            ]],
        );

        let contents = read_separate_tracks_from_file(&path, NoteAutomationType::None).unwrap();
        assert!(contents.lists.is_empty());
        assert_eq!(contents.tempo_changes.len(), 2);
        assert_eq!(contents.tempo_changes[1].tempo.bpm(), 60.0);
        assert_eq!(contents.tempo_changes[1].time_signature, TimeSignature::three_four());
        assert!(!file_has_tempo_changes(&path));
    }

    #[test]
    fn test_mpe_detection_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let bend = |delta, channel, value| midi(delta, channel, midly::MidiMessage::PitchBend { bend: PitchBend(u14::new(value)) });
        let path = write(
            &dir,
            "mpe.mid",
            vec![vec![
                bend(0, 1, 8192),
                note_on(0, 1, 60),
                bend(0, 2, 8192),
                note_on(0, 2, 64),
                bend(240, 1, 12288),
                note_off(240, 1, 60),
                note_off(0, 2, 64),
                meta(0, MetaMessage::EndOfTrack),
            ]],
        );

        assert!(looks_like_mpe_data(&path));

        let contents = read_separate_tracks_from_file(&path, NoteAutomationType::Expression).unwrap();
        let list = &contents.lists[0];
        assert_eq!(list.num_notes(), 2);
        assert!(list.contains_note_expression());
    }

    #[test]
    fn test_sysex_is_framed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "sysex.mid",
            vec![vec![
                TrackEvent {
                    delta: u28::new(480),
                    kind: TrackEventKind::SysEx(&[0x7E, 0x7F, 0x09, 0x01, 0xF7]),
                },
                meta(0, MetaMessage::EndOfTrack),
            ]],
        );

        let contents = read_separate_tracks_from_file(&path, NoteAutomationType::None).unwrap();
        let sysex = contents.lists[0].sysex_event_unchecked(0);
        assert_eq!(sysex.data(), &[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);
        assert_eq!(sysex.beat_position().in_beats(), 1.0);
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mid");
        assert!(matches!(
            read_separate_tracks_from_file(&missing, NoteAutomationType::None),
            Err(MidiFileError::Io(_))
        ));

        let garbage = dir.path().join("garbage.mid");
        std::fs::write(&garbage, b"not a midi file").unwrap();
        assert!(matches!(
            read_separate_tracks_from_file(&garbage, NoteAutomationType::None),
            Err(MidiFileError::Parse(_))
        ));
        assert!(!looks_like_mpe_data(&garbage));
        assert!(!file_has_tempo_changes(&garbage));
    }
}
