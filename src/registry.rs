//! Bookkeeping for every stage object created through a [`crate::ShaderSession`].
//!
//! Three maps are keyed by the live handle: its identity (hash and stage), the metadata
//! needed to reload or diff it later, and a retained object built from the unmodified
//! original bytecode. The maps are one unit. They sit behind a single mutex and every
//! composite operation, such as purging a reused handle and then inserting, runs under one
//! [`RegistryGuard`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tracing::info;

use crate::device::{ClassLinkage, ShaderHandle, ShaderRef};
use crate::stage::ShaderStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderIdentity {
    pub hash: u64,
    pub stage: ShaderStage,
}

/// What live-reload and inspection tooling needs to rebuild a shader.
#[derive(Debug)]
pub struct ReloadEntry {
    pub hash: u64,
    pub stage: ShaderStage,
    /// Compiler target, or [`crate::resolver::BINARY_MODEL`] when not yet known.
    pub shader_model: String,
    pub timestamp: Option<SystemTime>,
    pub linkage: Option<ClassLinkage>,
    /// Always the bytecode the application submitted, never a replacement.
    pub original_bytecode: Arc<[u8]>,
    pub header: String,
    /// No explicit replacement exists, so a deferred consumer may still patch this shader.
    pub deferred_candidate: bool,
    pub deferred_done: bool,
    /// A replacement installed after creation, e.g. by live reload.
    pub replacement: Option<ShaderRef>,
}

impl ReloadEntry {
    pub fn new(
        identity: ShaderIdentity,
        shader_model: impl Into<String>,
        original_bytecode: &[u8],
    ) -> Self {
        Self {
            hash: identity.hash,
            stage: identity.stage,
            shader_model: shader_model.into(),
            timestamp: None,
            linkage: None,
            original_bytecode: Arc::from(original_bytecode),
            header: String::new(),
            deferred_candidate: false,
            deferred_done: false,
            replacement: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<SystemTime>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_linkage(mut self, linkage: Option<&ClassLinkage>) -> Self {
        self.linkage = linkage.cloned();
        self
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn deferred_candidate(mut self, candidate: bool) -> Self {
        self.deferred_candidate = candidate;
        self
    }
}

#[derive(Debug, Default)]
struct RegistryMaps {
    identities: HashMap<ShaderHandle, ShaderIdentity>,
    reload: HashMap<ShaderHandle, ReloadEntry>,
    originals: HashMap<ShaderHandle, ShaderRef>,
}

#[derive(Debug, Default)]
pub struct ShaderRegistry {
    maps: Mutex<RegistryMaps>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            maps: self.maps.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }

    pub fn identity(&self, handle: ShaderHandle) -> Option<ShaderIdentity> {
        self.lock().identity(handle)
    }

    pub fn hash_of(&self, handle: ShaderHandle) -> Option<u64> {
        self.identity(handle).map(|identity| identity.hash)
    }
}

/// Exclusive access to all registry maps.
pub struct RegistryGuard<'a> {
    maps: MutexGuard<'a, RegistryMaps>,
}

impl RegistryGuard<'_> {
    /// Forgets everything recorded under `handle`, releasing any references held for it.
    ///
    /// Called on every freshly created handle before first use, because the platform can
    /// recycle handle values after a destruction that is not observed here. Returns whether
    /// anything was removed.
    pub fn purge(&mut self, handle: ShaderHandle) -> bool {
        let mut purged = false;
        if let Some(previous) = self.maps.identities.remove(&handle) {
            info!(
                %handle,
                previous_hash = %format_args!("{:016x}", previous.hash),
                "shader handle reused"
            );
            purged = true;
        }
        if self.maps.reload.remove(&handle).is_some() {
            info!(%handle, "shader handle reused, dropped reload entry");
            purged = true;
        }
        if self.maps.originals.remove(&handle).is_some() {
            info!(%handle, "shader handle reused, released previous original shader");
            purged = true;
        }
        purged
    }

    pub fn record_identity(&mut self, handle: ShaderHandle, identity: ShaderIdentity) {
        self.maps.identities.insert(handle, identity);
    }

    pub fn identity(&self, handle: ShaderHandle) -> Option<ShaderIdentity> {
        self.maps.identities.get(&handle).copied()
    }

    pub fn register_reload(&mut self, handle: ShaderHandle, entry: ReloadEntry) {
        info!(
            hash = %format_args!("{:016x}", entry.hash),
            stage = %entry.stage,
            model = %entry.shader_model,
            header = %entry.header,
            "shader registered for possible reloading"
        );
        self.maps.reload.insert(handle, entry);
    }

    pub fn reload_entry(&self, handle: ShaderHandle) -> Option<&ReloadEntry> {
        self.maps.reload.get(&handle)
    }

    pub fn reload_entry_mut(&mut self, handle: ShaderHandle) -> Option<&mut ReloadEntry> {
        self.maps.reload.get_mut(&handle)
    }

    pub fn reload_entries(&self) -> impl Iterator<Item = (ShaderHandle, &ReloadEntry)> {
        self.maps.reload.iter().map(|(handle, entry)| (*handle, entry))
    }

    /// Installs `replacement` on the reload entry for `handle`, releasing any previous one.
    ///
    /// Hands `replacement` back if there is no entry.
    pub fn set_replacement(
        &mut self,
        handle: ShaderHandle,
        replacement: ShaderRef,
    ) -> Result<(), ShaderRef> {
        match self.maps.reload.get_mut(&handle) {
            Some(entry) => {
                entry.replacement = Some(replacement);
                Ok(())
            }
            None => Err(replacement),
        }
    }

    pub fn mark_deferred_done(&mut self, handle: ShaderHandle) -> bool {
        match self.maps.reload.get_mut(&handle) {
            Some(entry) => {
                entry.deferred_done = true;
                true
            }
            None => false,
        }
    }

    /// Stores a retained original for `handle`, dropping any previous one.
    pub fn retain_original(&mut self, handle: ShaderHandle, original: ShaderRef) {
        self.maps.originals.insert(handle, original);
    }

    pub fn original(&self, handle: ShaderHandle) -> Option<&ShaderRef> {
        self.maps.originals.get(&handle)
    }

    pub fn remove_original(&mut self, handle: ShaderHandle) -> Option<ShaderRef> {
        self.maps.originals.remove(&handle)
    }

    pub fn identity_count(&self) -> usize {
        self.maps.identities.len()
    }

    pub fn reload_count(&self) -> usize {
        self.maps.reload.len()
    }

    pub fn original_count(&self) -> usize {
        self.maps.originals.len()
    }
}
