//! Plugin capability contract consumed by the playback engine.
//!
//! The engine never links a concrete decoder or renderer; it talks to both
//! through the [`Decoder`] and [`Renderer`] traits and obtains instances from
//! a [`PluginAgent`] factory. Everything a plugin exchanges with the engine
//! is a plain value type so host and plugin crates stay decoupled.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Kind tag carried by every plugin agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    Decoder,
    Renderer,
}

/// Channel layout reported by a decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    #[default]
    None,
    Mono,
    Stereo,
    JointStereo,
    DualChannel,
}

/// Descriptive metadata for a plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub version: String,
}

/// One introspectable plugin option, rendered as strings so hosts can show
/// them without knowing the plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOption {
    pub name: String,
    pub description: String,
    pub value: String,
}

/// Outcome of a single [`Decoder::decode_unit`] call.
///
/// `bytes` is how much of the output buffer was filled; `units` is how many
/// audio units that payload represents. The decoder advances its internal
/// index by `units`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodedUnit {
    pub bytes: usize,
    pub units: u64,
}

/// A format-specific decoder streaming one source file.
///
/// An *audio unit* is the smallest addressable sample group the decoder
/// exposes — typically one PCM sample across all channels, or one codec
/// frame. All positions and counts on this trait are in audio units.
pub trait Decoder: Send {
    /// Filename suffixes this decoder handles, lowercased.
    fn file_suffixes(&self) -> Vec<String>;

    /// Prepare to stream `path`.
    fn open(&mut self, path: &Path) -> anyhow::Result<()>;

    /// Release file resources. Safe to call when nothing is open.
    fn close(&mut self);

    /// Fill `out` with the payload starting at the current unit index and
    /// advance the index by the returned unit count.
    ///
    /// `out` is at least [`max_bytes_per_unit`](Self::max_bytes_per_unit)
    /// bytes long.
    fn decode_unit(&mut self, out: &mut [u8]) -> anyhow::Result<DecodedUnit>;

    /// Seek to unit `index`.
    fn set_unit_index(&mut self, index: u64);

    /// Current unit index.
    fn unit_index(&self) -> u64;

    /// Total units in the open source.
    fn unit_count(&self) -> u64;

    /// Upper bound on the payload size of a single decoded unit batch.
    fn max_bytes_per_unit(&self) -> usize;

    /// Total duration of the open source in milliseconds.
    fn duration_ms(&self) -> u64;

    fn bit_rate(&self) -> u32;
    fn sample_rate(&self) -> u32;
    fn bits_per_sample(&self) -> u16;
    fn channels(&self) -> u16;
    fn audio_mode(&self) -> AudioMode;

    /// Introspectable options, if any.
    fn options(&self) -> Vec<PluginOption> {
        Vec::new()
    }
}

/// A platform audio sink accepting decoded PCM payloads.
pub trait Renderer: Send {
    /// Acquire the output device.
    fn open(&mut self) -> anyhow::Result<()>;

    /// Release the output device.
    fn close(&mut self);

    /// Configure the device for the given stream format.
    fn setup(&mut self, channels: u16, sample_rate: u32, bits_per_sample: u16) -> anyhow::Result<()>;

    /// Write one payload to the device. An `Err` is treated as a transient
    /// device-busy condition by the engine.
    fn write(&mut self, data: &[u8]) -> anyhow::Result<()>;

    /// Current volume in renderer-defined units.
    fn volume_level(&self) -> i32;

    fn set_volume_level(&mut self, level: i32);

    fn options(&self) -> Vec<PluginOption> {
        Vec::new()
    }
}

/// Factory handle for one plugin.
///
/// Agents are compared by identity (`Arc::ptr_eq`) when unregistering, so a
/// host must pass the same `Arc` it registered. An agent implements the
/// factory method matching its [`PluginType`] and leaves the other at the
/// default `None`.
pub trait PluginAgent: Send + Sync {
    fn plugin_type(&self) -> PluginType;

    fn info(&self) -> PluginInfo;

    fn create_decoder(&self) -> Option<Box<dyn Decoder>> {
        None
    }

    fn create_renderer(&self) -> Option<Box<dyn Renderer>> {
        None
    }
}
