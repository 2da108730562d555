// Timeline - Musical time representation
// Beat and time coordinates, tempo, time signature and MIDI channel values

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Time signature (numerator/denominator)
/// Example: 4/4 time = TimeSignature { numerator: 4, denominator: 4 }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,   // Beats per bar (typically 3, 4, 5, 6, 7)
    pub denominator: u8, // Note value (4 = quarter note, 8 = eighth note)
}

impl TimeSignature {
    /// Creates a new time signature
    pub fn new(numerator: u8, denominator: u8) -> Self {
        assert!(numerator > 0, "Time signature numerator must be > 0");
        assert!(
            denominator.is_power_of_two(),
            "Time signature denominator must be power of 2"
        );
        Self {
            numerator,
            denominator,
        }
    }

    /// Common 4/4 time signature
    pub fn four_four() -> Self {
        Self::new(4, 4)
    }

    /// Common 3/4 time signature (waltz)
    pub fn three_four() -> Self {
        Self::new(3, 4)
    }

    /// Number of beats per bar
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    pub const MIN_BPM: f64 = 20.0;
    pub const MAX_BPM: f64 = 999.0;

    /// Creates a new tempo
    /// BPM must be in range [20.0, 999.0]
    pub fn new(bpm: f64) -> Self {
        assert!(
            (Self::MIN_BPM..=Self::MAX_BPM).contains(&bpm),
            "BPM must be between 20 and 999"
        );
        Self { bpm }
    }

    /// Creates a tempo, clamping out-of-range values (used for file import)
    pub fn clamped(bpm: f64) -> Self {
        if bpm.is_nan() {
            return Self::default();
        }
        Self {
            bpm: bpm.clamp(Self::MIN_BPM, Self::MAX_BPM),
        }
    }

    /// Get BPM value
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Duration of one beat in seconds
    pub fn beat_duration_seconds(&self) -> f64 {
        60.0 / self.bpm
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

macro_rules! coordinate_type {
    ($name:ident, $unit:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
        pub struct $name(f64);

        impl $name {
            pub const fn zero() -> Self {
                Self(0.0)
            }

            /// Total ordering, NaN sorts last
            pub fn total_cmp(&self, other: &Self) -> Ordering {
                self.0.total_cmp(&other.0)
            }

            pub fn min(self, other: Self) -> Self {
                if other.0 < self.0 { other } else { self }
            }

            pub fn max(self, other: Self) -> Self {
                if other.0 > self.0 { other } else { self }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.3}{}", self.0, $unit)
            }
        }
    };
}

coordinate_type!(BeatPosition, " beats");
coordinate_type!(BeatDuration, " beats");
coordinate_type!(TimePosition, "s");
coordinate_type!(TimeDuration, "s");

impl BeatPosition {
    pub const fn from_beats(beats: f64) -> Self {
        Self(beats)
    }

    pub const fn in_beats(self) -> f64 {
        self.0
    }
}

impl BeatDuration {
    pub const fn from_beats(beats: f64) -> Self {
        Self(beats)
    }

    pub const fn in_beats(self) -> f64 {
        self.0
    }
}

impl TimePosition {
    pub const fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub const fn in_seconds(self) -> f64 {
        self.0
    }
}

impl TimeDuration {
    pub const fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub const fn in_seconds(self) -> f64 {
        self.0
    }
}

impl Add<BeatDuration> for BeatPosition {
    type Output = BeatPosition;
    fn add(self, rhs: BeatDuration) -> BeatPosition {
        BeatPosition(self.0 + rhs.0)
    }
}

impl AddAssign<BeatDuration> for BeatPosition {
    fn add_assign(&mut self, rhs: BeatDuration) {
        self.0 += rhs.0;
    }
}

impl Sub<BeatDuration> for BeatPosition {
    type Output = BeatPosition;
    fn sub(self, rhs: BeatDuration) -> BeatPosition {
        BeatPosition(self.0 - rhs.0)
    }
}

impl Sub for BeatPosition {
    type Output = BeatDuration;
    fn sub(self, rhs: BeatPosition) -> BeatDuration {
        BeatDuration(self.0 - rhs.0)
    }
}

impl Add for BeatDuration {
    type Output = BeatDuration;
    fn add(self, rhs: BeatDuration) -> BeatDuration {
        BeatDuration(self.0 + rhs.0)
    }
}

impl Sub for BeatDuration {
    type Output = BeatDuration;
    fn sub(self, rhs: BeatDuration) -> BeatDuration {
        BeatDuration(self.0 - rhs.0)
    }
}

impl Neg for BeatDuration {
    type Output = BeatDuration;
    fn neg(self) -> BeatDuration {
        BeatDuration(-self.0)
    }
}

impl Mul<f64> for BeatDuration {
    type Output = BeatDuration;
    fn mul(self, rhs: f64) -> BeatDuration {
        BeatDuration(self.0 * rhs)
    }
}

impl Add<TimeDuration> for TimePosition {
    type Output = TimePosition;
    fn add(self, rhs: TimeDuration) -> TimePosition {
        TimePosition(self.0 + rhs.0)
    }
}

impl Sub for TimePosition {
    type Output = TimeDuration;
    fn sub(self, rhs: TimePosition) -> TimeDuration {
        TimeDuration(self.0 - rhs.0)
    }
}

/// Half-open beat range [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BeatRange {
    pub start: BeatPosition,
    pub end: BeatPosition,
}

impl BeatRange {
    /// Creates a range, swapping the bounds if they are reversed
    pub fn new(start: BeatPosition, end: BeatPosition) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    pub fn between(start: f64, end: f64) -> Self {
        Self::new(BeatPosition::from_beats(start), BeatPosition::from_beats(end))
    }

    pub fn with_length(start: BeatPosition, length: BeatDuration) -> Self {
        Self::new(start, start + length)
    }

    pub fn length(&self) -> BeatDuration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, beat: BeatPosition) -> bool {
        beat >= self.start && beat < self.end
    }

    pub fn overlaps(&self, other: &BeatRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Half-open time range [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimePosition,
    pub end: TimePosition,
}

impl TimeRange {
    pub fn new(start: TimePosition, end: TimePosition) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    pub fn length(&self) -> TimeDuration {
        self.end - self.start
    }
}

/// MIDI channel number (1-16)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MidiChannel(u8);

impl MidiChannel {
    /// Creates a channel from its 1-based number
    pub fn new(number: u8) -> Self {
        assert!(
            (1..=16).contains(&number),
            "MIDI channel must be between 1 and 16"
        );
        Self(number)
    }

    /// Checked variant of [`MidiChannel::new`]
    pub fn try_new(number: i64) -> Option<Self> {
        (1..=16).contains(&number).then(|| Self(number as u8))
    }

    /// Channel encoded in the low nibble of a status byte
    pub fn from_status(status: u8) -> Self {
        Self((status & 0x0F) + 1)
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    /// 0-based channel index used in status bytes
    pub fn index(&self) -> u8 {
        self.0 - 1
    }
}

impl Default for MidiChannel {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for MidiChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ch {}", self.0)
    }
}
