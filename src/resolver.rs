//! Finds or produces replacement bytecode for a shader.
//!
//! Strategies run in a fixed order and the first one that yields bytecode wins:
//!
//! 1. a cached binary in the fixes directory (`_replace.bin`, then `.bin`),
//! 2. HLSL source (`_replace.txt`), compiled against the original's shader model,
//! 3. assembly source (`.txt`), reassembled,
//! 4. decompiling the original and keeping the result only if the auto-patcher changed it.
//!
//! Nothing here fails the caller. Missing files, stale caches, and toolchain errors are
//! logged and the next strategy is tried.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::stage::ShaderStage;
use crate::store::{ArtifactKind, CachedBinary, ShaderStore, SourceFile};
use crate::tools::{header_line, shader_model_from_disassembly, DecompileOptions, Toolchain};

/// Model tag for bytecode loaded straight from a cached binary. Reload tooling must
/// disassemble such a shader before it knows the real model.
pub const BINARY_MODEL: &str = "bin";

/// Which strategy produced a [`Replacement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementOrigin {
    CachedBinary,
    HlslSource,
    AssemblySource,
    Decompiled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub bytecode: Vec<u8>,
    pub shader_model: String,
    /// Modification time of the source consulted. `None` forces a later reload to retry.
    pub timestamp: Option<SystemTime>,
    /// First line of the source text, for tooling.
    pub header: String,
    pub origin: ReplacementOrigin,
}

pub struct Resolver {
    config: Arc<Config>,
    store: Option<ShaderStore>,
    tools: Toolchain,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Replacement is disabled unless both the fixes and the cache directories are configured.
    pub fn new(config: Arc<Config>, tools: Toolchain) -> Self {
        let store = match (&config.override_directory, &config.cache_directory) {
            (Some(fixes), Some(cache)) => Some(ShaderStore::new(fixes, cache)),
            _ => None,
        };
        Self {
            config,
            store,
            tools,
        }
    }

    pub fn store(&self) -> Option<&ShaderStore> {
        self.store.as_ref()
    }

    pub fn tools(&self) -> &Toolchain {
        &self.tools
    }

    pub fn resolve(&self, hash: u64, stage: ShaderStage, original: &[u8]) -> Option<Replacement> {
        let store = self.store.as_ref()?;

        if self.config.export_binary {
            if let Err(err) = store.export_original_binary(hash, stage, original) {
                warn!(%err, "error storing original binary shader");
            }
        }
        if self.config.export_shaders {
            self.export_disassembly(store, hash, stage, original);
        }

        self.from_cached_binary(store, hash, stage)
            .or_else(|| self.from_hlsl_source(store, hash, stage, original))
            .or_else(|| self.from_assembly_source(store, hash, stage, original))
            .or_else(|| self.decompile_and_patch(store, hash, stage, original))
    }

    fn override_model(&self, hash: u64) -> Option<&str> {
        self.config
            .shader_override(hash)
            .and_then(|o| o.model.as_deref())
            .filter(|model| !model.is_empty())
    }

    fn export_disassembly(
        &self,
        store: &ShaderStore,
        hash: u64,
        stage: ShaderStage,
        original: &[u8],
    ) {
        let text = match self.tools.disassembler.disassemble(original) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "unable to export shader disassembly");
                return;
            }
        };
        let path = store.cache_path(hash, stage, ArtifactKind::AsmSource);
        match store.write_new_text(&path, &text) {
            Ok(true) => info!(path = %path.display(), "stored disassembly"),
            Ok(false) => {}
            Err(err) => warn!(%err, "error storing disassembly"),
        }
    }

    fn from_cached_binary(
        &self,
        store: &ShaderStore,
        hash: u64,
        stage: ShaderStage,
    ) -> Option<Replacement> {
        for kind in [ArtifactKind::HlslBinary, ArtifactKind::AsmBinary] {
            match store.load_cached_binary(hash, stage, kind) {
                Ok(CachedBinary::Hit {
                    bytes, timestamp, ..
                }) => {
                    return Some(Replacement {
                        bytecode: bytes,
                        shader_model: BINARY_MODEL.to_string(),
                        timestamp,
                        header: String::new(),
                        origin: ReplacementOrigin::CachedBinary,
                    });
                }
                Ok(CachedBinary::Missing | CachedBinary::Stale(_)) => {}
                Err(err) => warn!(%err, "error reading cached shader"),
            }
        }
        None
    }

    fn read_fix_source(&self, store: &ShaderStore, path: &Path) -> Option<SourceFile> {
        match store.read_source(path) {
            Ok(source) => source,
            Err(err) => {
                warn!(%err, "error reading shader source");
                None
            }
        }
    }

    /// The model of the original, recovered from its disassembly.
    fn original_model(&self, original: &[u8]) -> Option<String> {
        let model = self
            .tools
            .disassembler
            .disassemble(original)
            .ok()
            .and_then(|text| {
                shader_model_from_disassembly(&text).map(str::to_string)
            });
        if model.is_none() {
            info!("disassembly of original shader failed");
        }
        model
    }

    fn from_hlsl_source(
        &self,
        store: &ShaderStore,
        hash: u64,
        stage: ShaderStage,
        original: &[u8],
    ) -> Option<Replacement> {
        let path = store.fixes_path(hash, stage, ArtifactKind::HlslSource);
        let source = self.read_fix_source(store, &path)?;
        info!(path = %path.display(), size = source.text.len(), "replacement HLSL shader found");
        store.warn_if_conflicting(hash, stage, ArtifactKind::HlslSource);

        let model = self.original_model(original)?;
        let target = self.override_model(hash).unwrap_or(&model);
        info!(target, "compiling replacement HLSL code");

        let compiled = self
            .tools
            .compiler
            .compile(&source.text, &source.path, "main", target);
        if let Some(diagnostics) = &compiled.diagnostics {
            log_diagnostics(diagnostics, None);
        }
        let bytecode = compiled.bytecode?;

        if self.config.cache_shaders {
            let bin = store.fixes_path(hash, stage, ArtifactKind::HlslBinary);
            if let Err(err) = store.write_cached_binary(&bin, &bytecode, source.modified) {
                warn!(%err, "error writing compiled shader");
            }
        }

        Some(Replacement {
            bytecode,
            shader_model: model,
            timestamp: Some(source.modified),
            header: header_line(&source.text).to_string(),
            origin: ReplacementOrigin::HlslSource,
        })
    }

    fn from_assembly_source(
        &self,
        store: &ShaderStore,
        hash: u64,
        stage: ShaderStage,
        original: &[u8],
    ) -> Option<Replacement> {
        let path = store.fixes_path(hash, stage, ArtifactKind::AsmSource);
        let source = self.read_fix_source(store, &path)?;
        info!(path = %path.display(), size = source.text.len(), "replacement ASM shader found");
        store.warn_if_conflicting(hash, stage, ArtifactKind::AsmSource);

        let model = self.original_model(original)?;

        let assembled = match self.tools.assembler.assemble(
            &source.text,
            original,
            self.config.assemble_signature_comments,
        ) {
            Ok(assembled) => assembled,
            Err(err) => {
                warn!(path = %path.display(), %err, "error assembling shader");
                return None;
            }
        };

        let timestamp = if assembled.parse_errors.is_empty() {
            if self.config.cache_shaders {
                let bin = store.fixes_path(hash, stage, ArtifactKind::AsmBinary);
                if let Err(err) =
                    store.write_cached_binary(&bin, &assembled.bytecode, source.modified)
                {
                    warn!(%err, "error storing reassembled binary");
                }
            }
            Some(source.modified)
        } else {
            // Left unstamped and uncached so the next reload retries and shows the errors again.
            for parse_error in &assembled.parse_errors {
                warn!(path = %path.display(), "{parse_error}");
            }
            None
        };

        Some(Replacement {
            bytecode: assembled.bytecode,
            shader_model: model,
            timestamp,
            header: header_line(&source.text).to_string(),
            origin: ReplacementOrigin::AssemblySource,
        })
    }

    fn decompile_and_patch(
        &self,
        store: &ShaderStore,
        hash: u64,
        stage: ShaderStage,
        original: &[u8],
    ) -> Option<Replacement> {
        let config = &*self.config;
        if !config.decompile_enabled() {
            return None;
        }

        let bad = store.fixes_path(hash, stage, ArtifactKind::BadMarker);
        if bad.exists() {
            info!(path = %bad.display(), "skipping shader marked bad");
            return None;
        }

        // Reference exports go to the cache; auto-fixes go live in the fixes directory.
        let target = if config.export_hlsl >= 1 {
            store.cache_path(hash, stage, ArtifactKind::HlslSource)
        } else {
            store.fixes_path(hash, stage, ArtifactKind::HlslSource)
        };
        if target.exists() {
            return None;
        }

        let disassembly = match self.tools.disassembler.disassemble(original) {
            Ok(text) if !text.is_empty() => text,
            _ => {
                info!("disassembly of original shader failed");
                return None;
            }
        };

        debug!("creating HLSL representation");
        let options = DecompileOptions {
            fix_sv_position: config.fix_sv_position,
            recompile_all_vs: config.recompile_all_vs,
        };
        let decompiled = match self
            .tools
            .decompiler
            .decompile(original, &disassembly, options)
        {
            Ok(decompiled) if !decompiled.hlsl.is_empty() => decompiled,
            Ok(_) => {
                info!("decompiler produced no output");
                return None;
            }
            Err(err) => {
                info!(%err, "error while decompiling");
                return None;
            }
        };

        let write = config.export_hlsl >= 1 || (config.export_fixed && decompiled.patched);
        let mut text = decompiled.hlsl.clone();
        if write && config.export_hlsl >= 2 {
            append_comment_block(&mut text, "Original ASM", &disassembly);
        }

        let target_model = self
            .override_model(hash)
            .unwrap_or(&decompiled.shader_model);
        info!(
            target = target_model,
            size = decompiled.hlsl.len(),
            "compiling fixed HLSL code"
        );
        let compiled = self
            .tools
            .compiler
            .compile(&decompiled.hlsl, &target, "main", target_model);

        if let Some(diagnostics) = &compiled.diagnostics {
            log_diagnostics(diagnostics, Some(&decompiled.hlsl));
            if write {
                append_comment_block(&mut text, "HLSL errors", diagnostics);
            }
        }

        if write && config.export_hlsl >= 3 {
            if let Some(bytecode) = &compiled.bytecode {
                match self.tools.disassembler.disassemble(bytecode) {
                    Ok(recompiled) => {
                        append_comment_block(&mut text, "Recompiled ASM", &recompiled)
                    }
                    Err(_) => info!("disassembly of recompiled shader failed"),
                }
            }
        }

        let mut timestamp = None;
        if write {
            match store.write_new_text(&target, &text) {
                Ok(true) => {
                    info!(path = %target.display(), "stored decompiled shader");
                    timestamp = fs::metadata(&target).and_then(|m| m.modified()).ok();
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(%err, "failed to write decompiled shader");
                    return None;
                }
            }
        }

        // An unpatched decompile is kept for reference only.
        if !decompiled.patched {
            return None;
        }
        Some(Replacement {
            bytecode: compiled.bytecode?,
            shader_model: decompiled.shader_model.clone(),
            timestamp,
            header: header_line(&decompiled.hlsl).to_string(),
            origin: ReplacementOrigin::Decompiled,
        })
    }
}

const BEGIN_MARKER: &str = "---------- BEGIN ----------";
const SOURCE_MARKER: &str = "---------- HLSL code ----------";
const END_MARKER: &str = "---------- END ----------";

fn log_diagnostics(diagnostics: &str, source: Option<&str>) {
    match source {
        Some(source) => warn!(
            "compiler output\n{BEGIN_MARKER}\n{}\n{SOURCE_MARKER}\n{}\n{END_MARKER}",
            diagnostics.trim_end(),
            source
        ),
        None => warn!(
            "compiler output\n{BEGIN_MARKER}\n{}\n{END_MARKER}",
            diagnostics.trim_end()
        ),
    }
}

fn append_comment_block(out: &mut String, title: &str, body: &str) {
    out.push_str("\n\n/*~~~~~~~~~~~~~~~~~~~~ ");
    out.push_str(title);
    out.push_str(" ~~~~~~~~~~~~~~~~~~~~\n");
    out.push_str(body);
    out.push_str("\n//~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~*/\n");
}
