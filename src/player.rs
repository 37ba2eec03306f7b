//! Player state machine and command surface.
//!
//! Commands may arrive from any thread — including a completion observer —
//! and serialize through one internal mutex. The two worker threads never
//! touch that mutex, so a command blocked on a worker handshake cannot
//! deadlock against them.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use audio_engine_plugin::{AudioMode, PluginAgent, PluginType};

use crate::error::PlayerError;
use crate::registry::{DecoderRegistry, PluginOptionGroup, RendererSlot};
use crate::signal::FinishedSignal;
use crate::state::{PlayerSnapshot, PlayerStatus, Shared, SharedDecoder};
use crate::worker;

/// Control-thread-only state, serialized behind one mutex.
struct Control {
    decoders: DecoderRegistry,
    renderer: RendererSlot,
    active_decoder: Option<SharedDecoder>,
    file_name: Option<PathBuf>,
    units_per_ms: f64,
    /// Whether the workers have been woken for a cycle whose `end` posts
    /// have not been consumed yet. Guards the pause handshake against
    /// workers that were never started for the current source.
    cycle_running: bool,
}

/// The playback engine: a decoder thread and a renderer thread coupled by a
/// bounded ring of reusable frame slots, driven by the commands below.
pub struct Player {
    shared: Arc<Shared>,
    control: Mutex<Control>,
    decoder_thread: Option<JoinHandle<()>>,
    renderer_thread: Option<JoinHandle<()>>,
}

impl Player {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::new());

        let decoder_shared = shared.clone();
        let decoder_thread = thread::spawn(move || worker::decoder_loop(decoder_shared));
        let renderer_shared = shared.clone();
        let renderer_thread = thread::spawn(move || worker::renderer_loop(renderer_shared));

        Self {
            shared,
            control: Mutex::new(Control {
                decoders: DecoderRegistry::new(),
                renderer: RendererSlot::new(),
                active_decoder: None,
                file_name: None,
                units_per_ms: 0.0,
                cycle_running: false,
            }),
            decoder_thread: Some(decoder_thread),
            renderer_thread: Some(renderer_thread),
        }
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.status()
    }

    // ---- plugin management ----------------------------------------------

    pub fn register_decoder_plugin(&self, agent: &Arc<dyn PluginAgent>) {
        if agent.plugin_type() != PluginType::Decoder {
            return;
        }
        self.control.lock().unwrap().decoders.register(agent);
    }

    pub fn register_decoder_plugins(&self, agents: &[Arc<dyn PluginAgent>]) {
        for agent in agents {
            self.register_decoder_plugin(agent);
        }
    }

    pub fn register_renderer_plugin(&self, agent: &Arc<dyn PluginAgent>) {
        if agent.plugin_type() != PluginType::Renderer {
            return;
        }
        let mut control = self.control.lock().unwrap();
        control.renderer.set(agent);
        *self.shared.active_renderer.lock().unwrap() = control.renderer.renderer();
    }

    /// Unregister a plugin of either kind. If its instance is the one the
    /// engine is currently playing through, the engine closes first.
    pub fn unregister_plugin(&self, agent: &Arc<dyn PluginAgent>) {
        let mut control = self.control.lock().unwrap();
        match agent.plugin_type() {
            PluginType::Decoder => self.remove_decoder_plugin(&mut control, agent),
            PluginType::Renderer => self.remove_renderer_plugin(&mut control, agent),
        }
    }

    pub fn unregister_plugins(&self, agents: &[Arc<dyn PluginAgent>]) {
        for agent in agents {
            self.unregister_plugin(agent);
        }
    }

    pub fn unregister_all(&self) {
        let mut control = self.control.lock().unwrap();
        // One agent may occupy several suffix entries; draining through
        // `first_agent` processes each agent exactly once.
        while let Some(agent) = control.decoders.first_agent() {
            self.remove_decoder_plugin(&mut control, &agent);
        }
        if control.renderer.is_set() {
            if self.shared.status() != PlayerStatus::Closed {
                self.do_close(&mut control);
            }
            control.renderer.unset_current();
            *self.shared.active_renderer.lock().unwrap() = None;
        }
    }

    pub fn supported_suffixes(&self) -> Vec<String> {
        self.control.lock().unwrap().decoders.supported_suffixes()
    }

    pub fn decoder_plugin_options(&self) -> Vec<PluginOptionGroup> {
        self.control.lock().unwrap().decoders.option_groups()
    }

    pub fn renderer_plugin_option(&self) -> Option<PluginOptionGroup> {
        self.control.lock().unwrap().renderer.option_group()
    }

    fn remove_decoder_plugin(&self, control: &mut Control, agent: &Arc<dyn PluginAgent>) {
        if let Some(instance) = control.decoders.instance_of(agent) {
            let live = control
                .active_decoder
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active, &instance));
            if live {
                self.do_close(control);
            }
            control.decoders.remove(agent);
        }
    }

    fn remove_renderer_plugin(&self, control: &mut Control, agent: &Arc<dyn PluginAgent>) {
        if !control.renderer.holds(agent) {
            return;
        }
        if self.shared.status() != PlayerStatus::Closed {
            self.do_close(control);
        }
        control.renderer.unset(agent);
        *self.shared.active_renderer.lock().unwrap() = None;
    }

    // ---- buffering and volume -------------------------------------------

    pub fn buffer_count(&self) -> usize {
        self.shared.ring.count()
    }

    /// Change the slot count. Legal only while closed.
    pub fn set_buffer_count(&self, count: usize) {
        let _control = self.control.lock().unwrap();
        if self.shared.status() != PlayerStatus::Closed {
            tracing::debug!(status = %self.shared.status(), "set_buffer_count ignored");
            return;
        }
        self.shared.ring.set_count(count);
    }

    /// Renderer-defined volume level; -1 when no renderer is set.
    pub fn volume(&self) -> i32 {
        self.control.lock().unwrap().renderer.volume()
    }

    pub fn set_volume(&self, level: i32) {
        self.control.lock().unwrap().renderer.set_volume(level);
    }

    // ---- open / close ----------------------------------------------------

    /// Resolve a decoder by the file's suffix, open the source, size the
    /// ring and configure the renderer for the stream format.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<(), PlayerError> {
        let path = path.as_ref();
        let mut control = self.control.lock().unwrap();

        if self.shared.status() != PlayerStatus::Closed {
            tracing::debug!(status = %self.shared.status(), "open ignored");
            return Ok(());
        }

        let suffix = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let decoder = control
            .decoders
            .lookup(&suffix)
            .ok_or_else(|| PlayerError::NoDecoder(suffix.clone()))?;
        let renderer = control.renderer.renderer().ok_or(PlayerError::NoRenderer)?;

        decoder
            .lock()
            .unwrap()
            .open(path)
            .map_err(PlayerError::Decoder)?;

        let (max_bytes, unit_count, duration_ms, channels, sample_rate, bits_per_sample) = {
            let d = decoder.lock().unwrap();
            (
                d.max_bytes_per_unit(),
                d.unit_count(),
                d.duration_ms(),
                d.channels(),
                d.sample_rate(),
                d.bits_per_sample(),
            )
        };

        self.shared.ring.prepare(max_bytes);
        control.units_per_ms = unit_count as f64 / duration_ms.max(1) as f64;

        if let Err(err) = renderer
            .lock()
            .unwrap()
            .setup(channels, sample_rate, bits_per_sample)
        {
            decoder.lock().unwrap().close();
            control.units_per_ms = 0.0;
            return Err(PlayerError::Renderer(err));
        }

        self.shared.unit_beg.store(0, Ordering::Release);
        self.shared.unit_end.store(unit_count, Ordering::Release);
        self.shared.decoder_index.store(0, Ordering::Release);
        self.shared.renderer_index.store(0, Ordering::Release);

        *self.shared.active_decoder.lock().unwrap() = Some(decoder.clone());
        control.active_decoder = Some(decoder);
        control.file_name = Some(path.to_path_buf());
        self.shared.set_status(PlayerStatus::Stopped);

        tracing::info!(
            file = %path.display(),
            channels,
            sample_rate,
            bits_per_sample,
            unit_count,
            "source opened"
        );
        Ok(())
    }

    pub fn close(&self) {
        let mut control = self.control.lock().unwrap();
        self.do_close(&mut control);
    }

    fn do_close(&self, control: &mut Control) {
        if self.shared.status() == PlayerStatus::Closed {
            return;
        }

        self.do_pause(control);

        if let Some(decoder) = control.active_decoder.take() {
            decoder.lock().unwrap().close();
        }
        *self.shared.active_decoder.lock().unwrap() = None;
        control.file_name = None;
        control.units_per_ms = 0.0;
        self.shared.set_status(PlayerStatus::Closed);
        tracing::info!("source closed");
    }

    // ---- transport -------------------------------------------------------

    /// Play the whole source.
    pub fn play(&self) {
        let mut control = self.control.lock().unwrap();
        if self.shared.status() != PlayerStatus::Stopped {
            tracing::debug!(status = %self.shared.status(), "play ignored");
            return;
        }
        let Some(decoder) = control.active_decoder.clone() else {
            return;
        };
        let total = decoder.lock().unwrap().unit_count();
        self.do_play_range(&mut control, 0, total);
    }

    /// Play `[ms_begin, ms_end)`; `None` plays to the end of the source.
    pub fn play_range(&self, ms_begin: u64, ms_end: Option<u64>) {
        let mut control = self.control.lock().unwrap();
        if self.shared.status() != PlayerStatus::Stopped {
            tracing::debug!(status = %self.shared.status(), "play_range ignored");
            return;
        }
        let Some(decoder) = control.active_decoder.clone() else {
            return;
        };
        let total = decoder.lock().unwrap().unit_count();

        let beg = ((control.units_per_ms * ms_begin as f64) as u64).min(total);
        let end = match ms_end {
            Some(ms) => ((control.units_per_ms * ms as f64) as u64).min(total),
            None => total,
        };
        // An inverted range degenerates to an empty one.
        self.do_play_range(&mut control, beg, end.max(beg));
    }

    pub fn pause(&self) {
        let mut control = self.control.lock().unwrap();
        if self.shared.status() == PlayerStatus::Playing {
            self.do_pause(&mut control);
        }
    }

    pub fn resume(&self) {
        let mut control = self.control.lock().unwrap();
        if self.shared.status() == PlayerStatus::Paused {
            self.do_resume(&mut control);
        }
    }

    pub fn seek_time(&self, ms: u64) {
        let mut control = self.control.lock().unwrap();
        match self.shared.status() {
            PlayerStatus::Playing => {
                self.do_pause(&mut control);
                self.do_seek_time(&mut control, ms);
                self.do_resume(&mut control);
            }
            PlayerStatus::Paused | PlayerStatus::Stopped => {
                self.do_seek_time(&mut control, ms);
            }
            PlayerStatus::Closed => {}
        }
    }

    /// Seek to a fraction of the current range.
    pub fn seek_percent(&self, percent: f64) {
        let mut control = self.control.lock().unwrap();
        let beg = self.shared.unit_beg.load(Ordering::Acquire);
        let end = self.shared.unit_end.load(Ordering::Acquire);
        let unit = (beg as f64 + (end - beg) as f64 * percent).max(0.0) as u64;

        match self.shared.status() {
            PlayerStatus::Playing => {
                self.do_pause(&mut control);
                self.do_seek_unit(&mut control, unit);
                self.do_resume(&mut control);
            }
            PlayerStatus::Paused | PlayerStatus::Stopped => {
                self.do_seek_unit(&mut control, unit);
            }
            PlayerStatus::Closed => {}
        }
    }

    fn do_play_range(&self, control: &mut Control, beg: u64, end: u64) {
        let Some(decoder) = control.active_decoder.clone() else {
            return;
        };

        self.shared.unit_beg.store(beg, Ordering::Release);
        self.shared.unit_end.store(end, Ordering::Release);
        self.shared.decoder_index.store(beg, Ordering::Release);
        self.shared.renderer_index.store(beg, Ordering::Release);
        decoder.lock().unwrap().set_unit_index(beg);
        self.shared.ring.reset();

        self.start_workers(control);
        tracing::debug!(unit_beg = beg, unit_end = end, "playback started");
    }

    fn do_pause(&self, control: &mut Control) {
        if !control.cycle_running {
            self.shared.set_status(PlayerStatus::Paused);
            return;
        }

        self.shared.suspend_renderer.store(true, Ordering::Release);
        self.shared.suspend_decoder.store(true, Ordering::Release);
        self.shared.ring.interrupt();
        self.shared.renderer_latches.end.wait();
        self.shared.decoder_latches.end.wait();
        self.shared.ring.reset();

        control.cycle_running = false;
        self.shared.set_status(PlayerStatus::Paused);
        tracing::debug!(
            unit_index = self.shared.renderer_index.load(Ordering::Acquire),
            "playback paused"
        );
    }

    fn do_resume(&self, control: &mut Control) {
        let Some(decoder) = control.active_decoder.clone() else {
            return;
        };

        // Frames decoded ahead of the pause were discarded with the ring;
        // restart decoding from what was actually rendered.
        let index = self.shared.renderer_index.load(Ordering::Acquire);
        self.shared.decoder_index.store(index, Ordering::Release);
        decoder.lock().unwrap().set_unit_index(index);
        self.shared.ring.reset();

        self.start_workers(control);
        tracing::debug!(unit_index = index, "playback resumed");
    }

    /// Wake both workers and wait until each confirms it entered its cycle.
    ///
    /// The status flips to Playing before the wakes are posted: a cycle
    /// whose range is already exhausted transitions straight to Stopped
    /// from the renderer worker, and that write must come last.
    fn start_workers(&self, control: &mut Control) {
        self.shared.set_status(PlayerStatus::Playing);
        self.shared.suspend_renderer.store(false, Ordering::Release);
        self.shared.renderer_latches.wake.post();
        self.shared.suspend_decoder.store(false, Ordering::Release);
        self.shared.decoder_latches.wake.post();
        self.shared.renderer_latches.begin.wait();
        self.shared.decoder_latches.begin.wait();

        control.cycle_running = true;
    }

    fn do_seek_time(&self, control: &mut Control, ms: u64) {
        let Some(decoder) = control.active_decoder.clone() else {
            return;
        };
        let total = decoder.lock().unwrap().unit_count();
        let unit = ((control.units_per_ms * ms as f64) as u64).min(total);
        self.do_seek_unit(control, unit);
    }

    fn do_seek_unit(&self, control: &mut Control, unit: u64) {
        let Some(decoder) = control.active_decoder.clone() else {
            return;
        };
        let beg = self.shared.unit_beg.load(Ordering::Acquire);
        let end = self.shared.unit_end.load(Ordering::Acquire);
        let unit = unit.clamp(beg, end);

        decoder.lock().unwrap().set_unit_index(unit);
        self.shared.decoder_index.store(unit, Ordering::Release);
        self.shared.renderer_index.store(unit, Ordering::Release);
        tracing::debug!(unit_index = unit, "seek");
    }

    // ---- introspection ---------------------------------------------------

    pub fn file_name(&self) -> Option<PathBuf> {
        self.control.lock().unwrap().file_name.clone()
    }

    /// Source bit rate, or -1 when closed.
    pub fn bit_rate(&self) -> i32 {
        match &self.control.lock().unwrap().active_decoder {
            Some(decoder) => decoder.lock().unwrap().bit_rate() as i32,
            None => -1,
        }
    }

    /// Source sample rate, or -1 when closed.
    pub fn sample_rate(&self) -> i32 {
        match &self.control.lock().unwrap().active_decoder {
            Some(decoder) => decoder.lock().unwrap().sample_rate() as i32,
            None => -1,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match &self.control.lock().unwrap().active_decoder {
            Some(decoder) => decoder.lock().unwrap().duration_ms(),
            None => 0,
        }
    }

    pub fn audio_mode(&self) -> AudioMode {
        match &self.control.lock().unwrap().active_decoder {
            Some(decoder) => decoder.lock().unwrap().audio_mode(),
            None => AudioMode::None,
        }
    }

    pub fn range_begin_ms(&self) -> u64 {
        let control = self.control.lock().unwrap();
        Self::units_to_ms(&control, self.shared.unit_beg.load(Ordering::Acquire))
    }

    pub fn range_end_ms(&self) -> u64 {
        let control = self.control.lock().unwrap();
        Self::units_to_ms(&control, self.shared.unit_end.load(Ordering::Acquire))
    }

    pub fn range_duration_ms(&self) -> u64 {
        let control = self.control.lock().unwrap();
        let beg = self.shared.unit_beg.load(Ordering::Acquire);
        let end = self.shared.unit_end.load(Ordering::Acquire);
        Self::units_to_ms(&control, end.saturating_sub(beg))
    }

    /// Position of the renderer within the source, in milliseconds.
    pub fn current_ms(&self) -> u64 {
        let control = self.control.lock().unwrap();
        Self::units_to_ms(&control, self.shared.renderer_index.load(Ordering::Acquire))
    }

    /// Position relative to the start of the range.
    pub fn offset_ms(&self) -> u64 {
        let control = self.control.lock().unwrap();
        let current =
            Self::units_to_ms(&control, self.shared.renderer_index.load(Ordering::Acquire));
        let begin = Self::units_to_ms(&control, self.shared.unit_beg.load(Ordering::Acquire));
        current.saturating_sub(begin)
    }

    fn units_to_ms(control: &Control, units: u64) -> u64 {
        if control.units_per_ms > 0.0 {
            (units as f64 / control.units_per_ms) as u64
        } else {
            0
        }
    }

    /// Fired when playback reaches the end of its range.
    pub fn sig_finished(&self) -> &FinishedSignal {
        &self.shared.finished
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let control = self.control.lock().unwrap();
        let (bit_rate, sample_rate, duration_ms, audio_mode) = match &control.active_decoder {
            Some(decoder) => {
                let d = decoder.lock().unwrap();
                (
                    d.bit_rate() as i32,
                    d.sample_rate() as i32,
                    d.duration_ms(),
                    d.audio_mode(),
                )
            }
            None => (-1, -1, 0, AudioMode::None),
        };
        PlayerSnapshot {
            status: self.shared.status(),
            file_name: control
                .file_name
                .as_ref()
                .map(|p| p.display().to_string()),
            current_ms: Self::units_to_ms(
                &control,
                self.shared.renderer_index.load(Ordering::Acquire),
            ),
            duration_ms,
            range_begin_ms: Self::units_to_ms(
                &control,
                self.shared.unit_beg.load(Ordering::Acquire),
            ),
            range_end_ms: Self::units_to_ms(
                &control,
                self.shared.unit_end.load(Ordering::Acquire),
            ),
            bit_rate,
            sample_rate,
            audio_mode,
            buffer_count: self.shared.ring.count(),
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();

        self.shared.stop_decoder.store(true, Ordering::Release);
        self.shared.stop_renderer.store(true, Ordering::Release);
        self.shared.decoder_latches.wake.post();
        self.shared.renderer_latches.wake.post();

        if let Some(handle) = self.decoder_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.renderer_thread.take() {
            let _ = handle.join();
        }

        self.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_in_illegal_states_are_ignored() {
        let player = Player::new();
        assert_eq!(player.status(), PlayerStatus::Closed);

        // None of these may block or change state on a closed player.
        player.play();
        player.play_range(0, Some(100));
        player.pause();
        player.resume();
        player.seek_time(10);
        player.seek_percent(0.5);
        player.close();
        assert_eq!(player.status(), PlayerStatus::Closed);
    }

    #[test]
    fn volume_is_minus_one_without_a_renderer() {
        let player = Player::new();
        assert_eq!(player.volume(), -1);
        player.set_volume(50);
        assert_eq!(player.volume(), -1);
    }

    #[test]
    fn buffer_count_is_adjustable_while_closed() {
        let player = Player::new();
        assert_eq!(player.buffer_count(), 5);
        player.set_buffer_count(3);
        assert_eq!(player.buffer_count(), 3);
    }

    #[test]
    fn open_without_plugins_reports_no_decoder() {
        let player = Player::new();
        let err = player.open("track.flac").unwrap_err();
        assert!(matches!(err, PlayerError::NoDecoder(suffix) if suffix == "flac"));
    }

    #[test]
    fn introspection_defaults_when_closed() {
        let player = Player::new();
        assert_eq!(player.bit_rate(), -1);
        assert_eq!(player.sample_rate(), -1);
        assert_eq!(player.duration_ms(), 0);
        assert_eq!(player.current_ms(), 0);
        assert_eq!(player.audio_mode(), AudioMode::None);
        assert!(player.file_name().is_none());

        let snapshot = player.snapshot();
        assert_eq!(snapshot.status, PlayerStatus::Closed);
        assert_eq!(snapshot.buffer_count, 5);
        assert!(snapshot.file_name.is_none());
    }
}
