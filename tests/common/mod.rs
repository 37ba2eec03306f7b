//! Synthetic decoder/renderer plugins for end-to-end playback tests.
//!
//! The decoder serves a fixed source of 1000 audio units (one byte per
//! unit, 1000 ms long) in frames of 100 units, stamping each byte with its
//! unit index so tests can verify ordering and seek targets from the
//! renderer's output alone. The renderer accumulates written payloads into
//! a shared sink and paces each write so transport commands can interleave
//! with a running playback.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, Once};
use std::time::{Duration, Instant};

use audio_engine::plugin::{
    AudioMode, DecodedUnit, Decoder, PluginAgent, PluginInfo, PluginOption, PluginType, Renderer,
};
use audio_engine::Player;
use crossbeam_channel::Receiver;

pub const TOTAL_UNITS: u64 = 1000;
pub const FRAME_UNITS: u64 = 100;
pub const MAX_BYTES_PER_UNIT: usize = 256;
pub const DURATION_MS: u64 = 1000;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Accumulates everything the synthetic renderer writes.
pub struct Sink {
    bytes: Mutex<Vec<u8>>,
    cv: Condvar,
}

impl Sink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bytes: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        })
    }

    fn push(&self, data: &[u8]) {
        let mut bytes = self.bytes.lock().unwrap();
        bytes.extend_from_slice(data);
        drop(bytes);
        self.cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap().len()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    /// Block until at least `n` bytes have been written.
    pub fn wait_for_len(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut bytes = self.bytes.lock().unwrap();
        while bytes.len() < n {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, _) = self.cv.wait_timeout(bytes, remaining).unwrap();
            bytes = guard;
        }
        true
    }
}

/// The byte stamp the synthetic decoder produces for `units`.
pub fn expected_pattern(units: std::ops::Range<u64>) -> Vec<u8> {
    units.map(|unit| unit as u8).collect()
}

struct SynthDecoder {
    index: u64,
    fail_open: bool,
}

impl Decoder for SynthDecoder {
    fn file_suffixes(&self) -> Vec<String> {
        vec!["syn".to_string()]
    }

    fn open(&mut self, _path: &Path) -> anyhow::Result<()> {
        if self.fail_open {
            anyhow::bail!("synthetic open failure");
        }
        self.index = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.index = 0;
    }

    fn decode_unit(&mut self, out: &mut [u8]) -> anyhow::Result<DecodedUnit> {
        let units = TOTAL_UNITS.saturating_sub(self.index).min(FRAME_UNITS);
        for offset in 0..units {
            out[offset as usize] = (self.index + offset) as u8;
        }
        self.index += units;
        Ok(DecodedUnit {
            bytes: units as usize,
            units,
        })
    }

    fn set_unit_index(&mut self, index: u64) {
        self.index = index.min(TOTAL_UNITS);
    }

    fn unit_index(&self) -> u64 {
        self.index
    }

    fn unit_count(&self) -> u64 {
        TOTAL_UNITS
    }

    fn max_bytes_per_unit(&self) -> usize {
        MAX_BYTES_PER_UNIT
    }

    fn duration_ms(&self) -> u64 {
        DURATION_MS
    }

    fn bit_rate(&self) -> u32 {
        8
    }

    fn sample_rate(&self) -> u32 {
        1000
    }

    fn bits_per_sample(&self) -> u16 {
        8
    }

    fn channels(&self) -> u16 {
        1
    }

    fn audio_mode(&self) -> AudioMode {
        AudioMode::Mono
    }

    fn options(&self) -> Vec<PluginOption> {
        vec![PluginOption {
            name: "frame-units".into(),
            description: "units emitted per decoded frame".into(),
            value: FRAME_UNITS.to_string(),
        }]
    }
}

pub struct SynthDecoderAgent {
    fail_open: bool,
}

impl SynthDecoderAgent {
    pub fn new() -> Arc<dyn PluginAgent> {
        Arc::new(Self { fail_open: false })
    }

    /// A decoder whose `open` always fails.
    pub fn failing() -> Arc<dyn PluginAgent> {
        Arc::new(Self { fail_open: true })
    }
}

impl PluginAgent for SynthDecoderAgent {
    fn plugin_type(&self) -> PluginType {
        PluginType::Decoder
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "synth-decoder".into(),
            description: "index-stamped synthetic source".into(),
            version: "1.0".into(),
        }
    }

    fn create_decoder(&self) -> Option<Box<dyn Decoder>> {
        Some(Box::new(SynthDecoder {
            index: 0,
            fail_open: self.fail_open,
        }))
    }
}

struct SynthRenderer {
    sink: Arc<Sink>,
    write_delay: Duration,
    fail_setup: bool,
    volume: i32,
}

impl Renderer for SynthRenderer {
    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn setup(&mut self, _channels: u16, _sample_rate: u32, _bits: u16) -> anyhow::Result<()> {
        if self.fail_setup {
            anyhow::bail!("synthetic setup failure");
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.sink.push(data);
        Ok(())
    }

    fn volume_level(&self) -> i32 {
        self.volume
    }

    fn set_volume_level(&mut self, level: i32) {
        self.volume = level;
    }
}

pub struct SynthRendererAgent {
    sink: Arc<Sink>,
    write_delay: Duration,
    fail_setup: bool,
}

impl SynthRendererAgent {
    pub fn new(sink: Arc<Sink>, write_delay: Duration) -> Arc<dyn PluginAgent> {
        Arc::new(Self {
            sink,
            write_delay,
            fail_setup: false,
        })
    }

    /// A renderer whose `setup` always fails.
    pub fn failing_setup(sink: Arc<Sink>) -> Arc<dyn PluginAgent> {
        Arc::new(Self {
            sink,
            write_delay: Duration::ZERO,
            fail_setup: true,
        })
    }
}

impl PluginAgent for SynthRendererAgent {
    fn plugin_type(&self) -> PluginType {
        PluginType::Renderer
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "synth-renderer".into(),
            description: "accumulating synthetic sink".into(),
            version: "1.0".into(),
        }
    }

    fn create_renderer(&self) -> Option<Box<dyn Renderer>> {
        Some(Box::new(SynthRenderer {
            sink: self.sink.clone(),
            write_delay: self.write_delay,
            fail_setup: self.fail_setup,
            volume: 75,
        }))
    }
}

pub struct SynthSetup {
    pub player: Arc<Player>,
    pub decoder_agent: Arc<dyn PluginAgent>,
    pub renderer_agent: Arc<dyn PluginAgent>,
    pub sink: Arc<Sink>,
}

/// A player with both synthetic plugins registered.
pub fn player_with_synth(write_delay: Duration) -> SynthSetup {
    init_tracing();
    let sink = Sink::new();
    let player = Arc::new(Player::new());
    let decoder_agent = SynthDecoderAgent::new();
    let renderer_agent = SynthRendererAgent::new(sink.clone(), write_delay);
    player.register_decoder_plugin(&decoder_agent);
    player.register_renderer_plugin(&renderer_agent);
    SynthSetup {
        player,
        decoder_agent,
        renderer_agent,
        sink,
    }
}

/// Forward the completion signal into a channel the test can block on.
pub fn finished_channel(player: &Player) -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    player.sig_finished().connect(move || {
        let _ = tx.send(());
    });
    rx
}
