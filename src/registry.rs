//! Decoder plugin registry and the single renderer slot.
//!
//! The registry creates exactly one decoder instance per registered agent
//! and indexes that instance under every filename suffix the decoder
//! declares. Suffix keys are lowercased on insert and lookup. An ordered map
//! keeps `supported_suffixes` deterministic.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use audio_engine_plugin::{PluginAgent, PluginInfo, PluginOption};

use crate::state::{SharedDecoder, SharedRenderer};

/// One suffix entry. Entries registered by the same agent share the same
/// decoder instance.
pub(crate) struct DecoderEntry {
    pub agent: Arc<dyn PluginAgent>,
    pub decoder: SharedDecoder,
}

/// A plugin's metadata together with its introspectable options.
#[derive(Clone, Debug)]
pub struct PluginOptionGroup {
    pub plugin: PluginInfo,
    pub options: Vec<PluginOption>,
}

#[derive(Default)]
pub(crate) struct DecoderRegistry {
    entries: BTreeMap<String, DecoderEntry>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Create the agent's decoder and index it under each declared suffix
    /// not already taken. An agent whose every suffix collides registers
    /// nothing and its instance is dropped on return.
    pub fn register(&mut self, agent: &Arc<dyn PluginAgent>) {
        let Some(instance) = agent.create_decoder() else {
            tracing::warn!(plugin = %agent.info().name, "decoder agent produced no decoder");
            return;
        };
        let suffixes = instance.file_suffixes();
        let decoder: SharedDecoder = Arc::new(Mutex::new(instance));

        let mut used = false;
        for suffix in &suffixes {
            let key = suffix.to_ascii_lowercase();
            if !self.entries.contains_key(&key) {
                self.entries.insert(
                    key,
                    DecoderEntry {
                        agent: agent.clone(),
                        decoder: decoder.clone(),
                    },
                );
                used = true;
            }
        }

        if used {
            tracing::info!(
                plugin = %agent.info().name,
                suffixes = ?suffixes,
                "registered decoder plugin"
            );
        } else {
            tracing::debug!(
                plugin = %agent.info().name,
                "decoder plugin registered no suffix, dropping instance"
            );
        }
    }

    /// The shared decoder instance registered by `agent`, if any.
    pub fn instance_of(&self, agent: &Arc<dyn PluginAgent>) -> Option<SharedDecoder> {
        self.entries
            .values()
            .find(|entry| Arc::ptr_eq(&entry.agent, agent))
            .map(|entry| entry.decoder.clone())
    }

    /// Erase every entry registered by `agent`.
    pub fn remove(&mut self, agent: &Arc<dyn PluginAgent>) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !Arc::ptr_eq(&entry.agent, agent));
        if self.entries.len() != before {
            tracing::info!(plugin = %agent.info().name, "unregistered decoder plugin");
        }
    }

    pub fn lookup(&self, suffix: &str) -> Option<SharedDecoder> {
        self.entries
            .get(&suffix.to_ascii_lowercase())
            .map(|entry| entry.decoder.clone())
    }

    pub fn supported_suffixes(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Some agent still present in the map, for drain-style removal.
    pub fn first_agent(&self) -> Option<Arc<dyn PluginAgent>> {
        self.entries.values().next().map(|entry| entry.agent.clone())
    }

    /// Option groups for every distinct decoder instance that exposes at
    /// least one option. Instances indexed under several suffixes are
    /// reported once.
    pub fn option_groups(&self) -> Vec<PluginOptionGroup> {
        let mut seen: Vec<*const Mutex<Box<dyn audio_engine_plugin::Decoder>>> = Vec::new();
        let mut groups = Vec::new();
        for entry in self.entries.values() {
            let ptr = Arc::as_ptr(&entry.decoder);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            let options = entry.decoder.lock().unwrap().options();
            if !options.is_empty() {
                groups.push(PluginOptionGroup {
                    plugin: entry.agent.info(),
                    options,
                });
            }
        }
        groups
    }
}

/// Holds at most one active renderer plugin and its instance.
#[derive(Default)]
pub(crate) struct RendererSlot {
    entry: Option<RendererEntry>,
}

pub(crate) struct RendererEntry {
    pub agent: Arc<dyn PluginAgent>,
    pub renderer: SharedRenderer,
}

impl RendererSlot {
    pub fn new() -> Self {
        Self { entry: None }
    }

    /// Install `agent`'s renderer and open its device. A slot that is
    /// already occupied stays as it is.
    pub fn set(&mut self, agent: &Arc<dyn PluginAgent>) {
        if self.entry.is_some() {
            return;
        }
        let Some(mut instance) = agent.create_renderer() else {
            tracing::warn!(plugin = %agent.info().name, "renderer agent produced no renderer");
            return;
        };
        if let Err(err) = instance.open() {
            tracing::warn!(plugin = %agent.info().name, "renderer open failed: {err:#}");
        }
        tracing::info!(plugin = %agent.info().name, "renderer plugin set");
        self.entry = Some(RendererEntry {
            agent: agent.clone(),
            renderer: Arc::new(Mutex::new(instance)),
        });
    }

    /// Whether the slot is occupied by `agent`.
    pub fn holds(&self, agent: &Arc<dyn PluginAgent>) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|entry| Arc::ptr_eq(&entry.agent, agent))
    }

    /// Close and release the renderer if it was installed by `agent`.
    pub fn unset(&mut self, agent: &Arc<dyn PluginAgent>) {
        if self.holds(agent) {
            self.unset_current();
        }
    }

    /// Close and release whatever renderer is installed.
    pub fn unset_current(&mut self) {
        if let Some(entry) = self.entry.take() {
            entry.renderer.lock().unwrap().close();
            tracing::info!(plugin = %entry.agent.info().name, "renderer plugin unset");
        }
    }

    pub fn renderer(&self) -> Option<SharedRenderer> {
        self.entry.as_ref().map(|entry| entry.renderer.clone())
    }

    pub fn is_set(&self) -> bool {
        self.entry.is_some()
    }

    pub fn volume(&self) -> i32 {
        match &self.entry {
            Some(entry) => entry.renderer.lock().unwrap().volume_level(),
            None => -1,
        }
    }

    pub fn set_volume(&self, level: i32) {
        if let Some(entry) = &self.entry {
            entry.renderer.lock().unwrap().set_volume_level(level);
        }
    }

    pub fn option_group(&self) -> Option<PluginOptionGroup> {
        self.entry.as_ref().map(|entry| PluginOptionGroup {
            plugin: entry.agent.info(),
            options: entry.renderer.lock().unwrap().options(),
        })
    }
}
