//! Preloaded zero-shot voices.
//!
//! Voices come from a static configuration file and are populated exactly
//! once while the engine loads. After that the cache is read-only, so lookups
//! never lock.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::SynthesisEngine;
use crate::request::format_reference_text;

/// One entry of the voice configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub id: String,
    /// Reference audio, relative to the asset root.
    pub file: String,
    #[serde(alias = "prompt_text", alias = "reference_text")]
    pub reference_text: String,
    #[serde(default)]
    pub description: String,
}

impl VoiceConfig {
    /// Read a JSON array of voice configurations.
    pub fn load_list<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<VoiceConfig>> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to load {}", path.as_ref().display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("{} is not a valid voice list", path.as_ref().display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceEntry {
    pub id: String,
    pub reference_audio_path: PathBuf,
    pub reference_text: String,
    pub description: String,
    /// Whether the engine accepted the voice into its embedding cache.
    pub engine_registered: bool,
}

#[derive(Debug, Default)]
struct LoadedVoices {
    order: Vec<VoiceEntry>,
    index: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct VoiceCacheManager {
    asset_root: PathBuf,
    default_voice_id: String,
    loaded: OnceLock<LoadedVoices>,
}

impl VoiceCacheManager {
    pub fn new(asset_root: impl Into<PathBuf>, default_voice_id: impl Into<String>) -> Self {
        Self {
            asset_root: asset_root.into(),
            default_voice_id: default_voice_id.into(),
            loaded: OnceLock::new(),
        }
    }

    pub fn default_voice_id(&self) -> &str {
        &self.default_voice_id
    }

    /// Populate the cache and register every present voice with `engine`.
    ///
    /// Voices whose reference file is missing are skipped. Returns how many
    /// voices were loaded; a second call leaves the cache untouched.
    pub fn load_voices(&self, engine: &mut dyn SynthesisEngine, configs: &[VoiceConfig]) -> usize {
        if let Some(existing) = self.loaded.get() {
            debug!("voice cache already populated, skipping reload");
            return existing.order.len();
        }

        let mut voices = LoadedVoices::default();
        for config in configs {
            if voices.index.contains_key(&config.id) {
                warn!(voice = %config.id, "duplicate voice id in configuration, skipping");
                continue;
            }

            let path = self.asset_root.join(&config.file);
            if !path.is_file() {
                warn!(voice = %config.id, path = %path.display(), "reference audio missing, voice skipped");
                continue;
            }

            let reference_text = format_reference_text(&config.reference_text);
            let engine_registered = match engine.register_voice(&config.id, &reference_text, &path) {
                Ok(()) => true,
                Err(e) => {
                    warn!(voice = %config.id, "engine did not cache voice: {e}");
                    false
                }
            };

            info!(voice = %config.id, registered = engine_registered, "voice loaded");
            voices.index.insert(config.id.clone(), voices.order.len());
            voices.order.push(VoiceEntry {
                id: config.id.clone(),
                reference_audio_path: path,
                reference_text: config.reference_text.clone(),
                description: config.description.clone(),
                engine_registered,
            });
        }

        let count = voices.order.len();
        if self.loaded.set(voices).is_err() {
            // Lost a race with a concurrent load; keep the first result.
            return self.voice_count();
        }
        info!("Loaded {count}/{} configured voices", configs.len());
        count
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn get_voice(&self, id: &str) -> Option<&VoiceEntry> {
        let voices = self.loaded.get()?;
        voices.index.get(id).map(|&i| &voices.order[i])
    }

    /// Loaded voices in registration order.
    pub fn list_voices(&self) -> &[VoiceEntry] {
        self.loaded.get().map(|v| v.order.as_slice()).unwrap_or(&[])
    }

    pub fn get_default_voice(&self) -> Option<&VoiceEntry> {
        self.get_voice(&self.default_voice_id)
    }

    pub fn voice_count(&self) -> usize {
        self.list_voices().len()
    }
}
