//! Process-wide settings for shader interception.
//!
//! The host decides where these come from; anything `serde` can read works, and
//! [`Config::from_json_str`] covers the common case. The values are fixed once a
//! [`crate::ShaderSession`] is built from them.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// How a shader's 64-bit identity is derived from its bytecode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    /// FNV over the full blob.
    #[default]
    #[serde(alias = "3dmigoto")]
    #[value(alias = "3dmigoto")]
    Fnv,
    /// The digest the compiler stored in the container header.
    Embedded,
    /// CRC32C over the semantically relevant sections only.
    Bytecode,
}

/// What the hunting overlay does to the currently selected shader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkingMode {
    #[default]
    Skip,
    Mono,
    Original,
    Pink,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthBufferFilter {
    #[default]
    None,
    DepthActive,
    DepthInactive,
}

/// Per-hash settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderOverride {
    #[serde(with = "hex_hash")]
    pub hash: u64,
    /// Compiler target to use instead of the one recovered from the original bytecode.
    pub model: Option<String>,
    pub depth_filter: DepthBufferFilter,
    #[serde(with = "hex_hash_opt")]
    pub partner: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shader_hash: HashMode,
    /// Directory holding live fixes (`ShaderFixes`). Replacement is off when unset.
    pub override_directory: Option<PathBuf>,
    /// Directory receiving exported originals and reference decompiles.
    pub cache_directory: Option<PathBuf>,
    /// Persist compiled/reassembled output next to its source text.
    pub cache_shaders: bool,
    pub export_binary: bool,
    pub export_shaders: bool,
    /// 0 = off, 1 = decompile everything, 2 = also embed original assembly,
    /// 3 = also embed the recompiled assembly.
    pub export_hlsl: u8,
    pub export_fixed: bool,
    pub fix_sv_position: bool,
    pub recompile_all_vs: bool,
    pub assemble_signature_comments: bool,
    pub hunting: bool,
    pub marking_mode: MarkingMode,
    pub config_reloadable: bool,
    pub show_original_enabled: bool,
    pub shader_overrides: Vec<ShaderOverride>,
    /// Stereo surface creation mode applied around every underlying create call.
    pub surface_create_mode: Option<i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shader_hash: HashMode::Fnv,
            override_directory: None,
            cache_directory: None,
            cache_shaders: false,
            export_binary: false,
            export_shaders: false,
            export_hlsl: 0,
            export_fixed: false,
            fix_sv_position: false,
            recompile_all_vs: false,
            assemble_signature_comments: false,
            hunting: false,
            marking_mode: MarkingMode::Skip,
            config_reloadable: false,
            show_original_enabled: false,
            shader_overrides: Vec::new(),
            surface_create_mode: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("export_hlsl must be 0..=3, got {0}")]
    ExportHlslOutOfRange(u8),
    #[error("duplicate shader override for hash {0:016x}")]
    DuplicateOverride(u64),
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_hlsl > 3 {
            return Err(ConfigError::ExportHlslOutOfRange(self.export_hlsl));
        }
        let mut seen = HashSet::new();
        for entry in &self.shader_overrides {
            if !seen.insert(entry.hash) {
                return Err(ConfigError::DuplicateOverride(entry.hash));
            }
        }
        Ok(())
    }

    pub fn shader_override(&self, hash: u64) -> Option<&ShaderOverride> {
        self.shader_overrides.iter().find(|o| o.hash == hash)
    }

    /// Whether the decompile-and-patch strategy runs at all.
    pub fn decompile_enabled(&self) -> bool {
        self.export_hlsl > 0 || self.fix_sv_position || self.recompile_all_vs
    }
}

// Hashes are written the way they appear in artifact file names: 16 hex digits.
mod hex_hash {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{hash:016x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let text = String::deserialize(d)?;
        parse(&text).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(text: &str) -> Result<u64, String> {
        let digits = text.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);
        u64::from_str_radix(digits, 16).map_err(|e| format!("invalid shader hash {text:?}: {e}"))
    }
}

mod hex_hash_opt {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(hash) => s.serialize_some(&format!("{hash:016x}")),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| hex_hash::parse(&text))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
