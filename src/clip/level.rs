// Clip level - Lock-free volume, mute and launch state shared with the render thread
// dB values are stored as u32 bits so the audio side never locks

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

pub const MIN_VOLUME_DB: f32 = -100.0;
pub const MAX_VOLUME_DB: f32 = 0.0;

/// Volume and mute of one clip
#[derive(Debug)]
pub struct ClipLevel {
    db_bits: AtomicU32,
    mute: AtomicBool,
}

impl ClipLevel {
    pub fn new(db: f32, mute: bool) -> Self {
        Self {
            db_bits: AtomicU32::new(clamp_db(db).to_bits()),
            mute: AtomicBool::new(mute),
        }
    }

    pub fn db(&self) -> f32 {
        f32::from_bits(self.db_bits.load(Ordering::Relaxed))
    }

    /// Set the volume (called from control thread), clamped to [-100, 0] dB
    pub fn set_db(&self, db: f32) {
        self.db_bits.store(clamp_db(db).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Relaxed);
    }

    /// Linear gain, 0 when muted
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            db_to_gain(self.db())
        }
    }
}

impl Default for ClipLevel {
    fn default() -> Self {
        Self::new(MAX_VOLUME_DB, false)
    }
}

fn clamp_db(db: f32) -> f32 {
    if db.is_nan() {
        MAX_VOLUME_DB
    } else {
        db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB)
    }
}

pub fn db_to_gain(db: f32) -> f32 {
    if db <= MIN_VOLUME_DB {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// Read handle on a clip's level for the playback graph
#[derive(Debug, Clone)]
pub struct LiveClipLevel {
    level: Arc<ClipLevel>,
}

impl LiveClipLevel {
    pub fn new(level: Arc<ClipLevel>) -> Self {
        Self { level }
    }

    pub fn db(&self) -> f32 {
        self.level.db()
    }

    pub fn is_muted(&self) -> bool {
        self.level.is_muted()
    }

    pub fn gain(&self) -> f32 {
        self.level.gain()
    }
}

/// Launch state of a clip played from a launcher slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Queued,
    Playing,
}

impl PlayState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Queued,
            2 => Self::Playing,
            _ => Self::Stopped,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Queued => 1,
            Self::Playing => 2,
        }
    }
}

/// Shared launch state, written by the control thread and read per block
#[derive(Debug)]
pub struct LaunchHandle {
    state: AtomicU8,
}

impl LaunchHandle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlayState::Stopped.to_u8()),
        }
    }

    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn queue(&self) {
        self.set(PlayState::Queued);
    }

    pub fn play(&self) {
        self.set(PlayState::Playing);
    }

    pub fn stop(&self) {
        self.set(PlayState::Stopped);
    }

    fn set(&self, state: PlayState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }
}

impl Default for LaunchHandle {
    fn default() -> Self {
        Self::new()
    }
}
