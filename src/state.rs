//! Player status, shared worker-visible state and the status snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use audio_engine_plugin::{AudioMode, Decoder, Renderer};
use serde::{Deserialize, Serialize};

use crate::latch::Latch;
use crate::ring::UnitBufferRing;
use crate::signal::FinishedSignal;

/// A live decoder instance shared between the registry, the engine and the
/// decoder worker.
pub type SharedDecoder = Arc<Mutex<Box<dyn Decoder>>>;

/// A live renderer instance shared between the slot, the engine and the
/// renderer worker.
pub type SharedRenderer = Arc<Mutex<Box<dyn Renderer>>>;

/// Player status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Closed,
    Playing,
    Paused,
    Stopped,
}

impl PlayerStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerStatus::Playing,
            2 => PlayerStatus::Paused,
            3 => PlayerStatus::Stopped,
            _ => PlayerStatus::Closed,
        }
    }
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerStatus::Closed => write!(f, "closed"),
            PlayerStatus::Playing => write!(f, "playing"),
            PlayerStatus::Paused => write!(f, "paused"),
            PlayerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// One-shot handshake trio owned by each worker.
pub(crate) struct WorkerLatches {
    /// Posted by the engine to start a playback cycle.
    pub wake: Latch,
    /// Posted by the worker right after waking.
    pub begin: Latch,
    /// Posted by the worker when it leaves its inner loop.
    pub end: Latch,
}

impl WorkerLatches {
    fn new() -> Self {
        Self {
            wake: Latch::new(),
            begin: Latch::new(),
            end: Latch::new(),
        }
    }
}

/// State visible to both worker threads and the command surface.
///
/// Indices and flags are atomics: a worker only mutates its own index while
/// running, and the command surface only writes them while that worker is
/// parked between its `end` post and the next `wake`.
pub(crate) struct Shared {
    pub ring: UnitBufferRing,

    pub status: AtomicU8,
    pub suspend_decoder: AtomicBool,
    pub suspend_renderer: AtomicBool,
    pub stop_decoder: AtomicBool,
    pub stop_renderer: AtomicBool,

    /// Units consumed from the source by the decoder.
    pub decoder_index: AtomicU64,
    /// Units written to the device by the renderer.
    pub renderer_index: AtomicU64,
    pub unit_beg: AtomicU64,
    pub unit_end: AtomicU64,

    pub decoder_latches: WorkerLatches,
    pub renderer_latches: WorkerLatches,

    pub active_decoder: Mutex<Option<SharedDecoder>>,
    pub active_renderer: Mutex<Option<SharedRenderer>>,

    pub finished: FinishedSignal,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            ring: UnitBufferRing::default(),
            status: AtomicU8::new(PlayerStatus::Closed as u8),
            // Workers start parked with nothing to stop.
            suspend_decoder: AtomicBool::new(true),
            suspend_renderer: AtomicBool::new(true),
            stop_decoder: AtomicBool::new(false),
            stop_renderer: AtomicBool::new(false),
            decoder_index: AtomicU64::new(0),
            renderer_index: AtomicU64::new(0),
            unit_beg: AtomicU64::new(0),
            unit_end: AtomicU64::new(0),
            decoder_latches: WorkerLatches::new(),
            renderer_latches: WorkerLatches::new(),
            active_decoder: Mutex::new(None),
            active_renderer: Mutex::new(None),
            finished: FinishedSignal::new(),
        }
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: PlayerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Transition Playing → Stopped. A command that already moved the state
    /// elsewhere (a concurrent pause or close) keeps its word.
    pub fn stop_if_playing(&self) {
        let _ = self.status.compare_exchange(
            PlayerStatus::Playing as u8,
            PlayerStatus::Stopped as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Aggregated view of the introspection accessors, serializable for any
/// control surface the caller bolts on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub status: PlayerStatus,
    pub file_name: Option<String>,
    pub current_ms: u64,
    pub duration_ms: u64,
    pub range_begin_ms: u64,
    pub range_end_ms: u64,
    pub bit_rate: i32,
    pub sample_rate: i32,
    pub audio_mode: AudioMode,
    pub buffer_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_u8() {
        for status in [
            PlayerStatus::Closed,
            PlayerStatus::Playing,
            PlayerStatus::Paused,
            PlayerStatus::Stopped,
        ] {
            assert_eq!(PlayerStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn status_displays_lowercase() {
        assert_eq!(PlayerStatus::Playing.to_string(), "playing");
        assert_eq!(PlayerStatus::Closed.to_string(), "closed");
    }
}
