//! Shader creation with transparent replacement.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::device::{
    ClassLinkage, CreationModeLock, ShaderHandle, ShaderRef, StageDescriptor, UnderlyingDevice,
};
use crate::error::{PlatformError, ShaderFixError};
use crate::hash::shader_hash;
use crate::policy::needs_original;
use crate::registry::{ReloadEntry, ShaderIdentity, ShaderRegistry};
use crate::resolver::{Resolver, BINARY_MODEL};
use crate::stage::ShaderStage;
use crate::tools::Toolchain;

/// Per-device interception state: settings, resolver, registry and the device being wrapped.
///
/// Every method takes `&self`; concurrent creation from several threads is expected.
pub struct ShaderSession {
    config: Arc<Config>,
    device: Arc<dyn UnderlyingDevice>,
    resolver: Resolver,
    registry: ShaderRegistry,
    creation_mode: CreationModeLock,
    hunting: AtomicBool,
    deferred_consumers: AtomicUsize,
}

impl std::fmt::Debug for ShaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderSession")
            .field("resolver", &self.resolver)
            .field("hunting", &self.hunting())
            .finish_non_exhaustive()
    }
}

impl ShaderSession {
    pub fn new(config: Config, device: Arc<dyn UnderlyingDevice>, tools: Toolchain) -> Self {
        let config = Arc::new(config);
        let hunting = config.hunting;
        Self {
            resolver: Resolver::new(config.clone(), tools),
            config,
            device,
            registry: ShaderRegistry::new(),
            creation_mode: CreationModeLock::new(),
            hunting: AtomicBool::new(hunting),
            deferred_consumers: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn device(&self) -> &Arc<dyn UnderlyingDevice> {
        &self.device
    }

    pub fn hunting(&self) -> bool {
        self.hunting.load(Ordering::Relaxed)
    }

    /// Hunting can be toggled at runtime; only shaders created afterwards are affected.
    pub fn set_hunting(&self, enabled: bool) {
        self.hunting.store(enabled, Ordering::Relaxed);
    }

    /// Registers a subsystem that may patch unreplaced shaders after creation. While any is
    /// registered, original bytecode of such shaders is kept in the registry.
    pub fn add_deferred_consumer(&self) {
        self.deferred_consumers.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregisters one deferred consumer. Returns `false`, leaving the count at zero, when
    /// none was registered.
    pub fn remove_deferred_consumer(&self) -> bool {
        let removed = self
            .deferred_consumers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if removed.is_err() {
            warn!("deferred consumer removed more often than added");
        }
        removed.is_ok()
    }

    pub fn deferred_consumers(&self) -> usize {
        self.deferred_consumers.load(Ordering::Acquire)
    }

    pub fn create_class_linkage(&self) -> Result<ClassLinkage, ShaderFixError> {
        Ok(self.device.create_class_linkage()?)
    }

    pub fn create_vertex_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, ShaderFixError> {
        self.create_shader(ShaderStage::Vertex, bytecode, linkage)
    }

    pub fn create_pixel_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, ShaderFixError> {
        self.create_shader(ShaderStage::Pixel, bytecode, linkage)
    }

    pub fn create_geometry_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, ShaderFixError> {
        self.create_shader(ShaderStage::Geometry, bytecode, linkage)
    }

    pub fn create_hull_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, ShaderFixError> {
        self.create_shader(ShaderStage::Hull, bytecode, linkage)
    }

    pub fn create_domain_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, ShaderFixError> {
        self.create_shader(ShaderStage::Domain, bytecode, linkage)
    }

    pub fn create_compute_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, ShaderFixError> {
        self.create_shader(ShaderStage::Compute, bytecode, linkage)
    }

    /// Creates a `stage` object for `bytecode`, substituting a replacement when one resolves.
    ///
    /// The returned handle carries one reference owned by the caller. Only the device's own
    /// refusal is an error. A replacement that resolves but fails to create is reported rather
    /// than silently swapped for the original.
    pub fn create_shader(
        &self,
        stage: ShaderStage,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, ShaderFixError> {
        let descriptor = StageDescriptor::of(stage);
        let Some(bytecode) = bytecode else {
            return Ok(self.create_via_device(descriptor, None, linkage)?);
        };

        let hash = shader_hash(self.config.shader_hash, bytecode);
        let identity = ShaderIdentity { hash, stage };
        let hunting = self.hunting();
        info!(
            hash = %format_args!("{hash:016x}"),
            %stage,
            len = bytecode.len(),
            "create shader"
        );

        let live = match self.resolver.resolve(hash, stage, bytecode) {
            Some(replacement) => {
                let handle = self
                    .create_via_device(descriptor, Some(&replacement.bytecode), linkage)
                    .map_err(|err| {
                        warn!(%err, "error replacing shader");
                        err
                    })?;
                let mut registry = self.registry.lock();
                registry.purge(handle);
                info!(%handle, origin = ?replacement.origin, "shader successfully replaced");
                if hunting {
                    // The original bytecode, not the replacement: tooling needs it to rebuild
                    // the shader if the fix is deleted.
                    registry.register_reload(
                        handle,
                        ReloadEntry::new(identity, replacement.shader_model, bytecode)
                            .with_timestamp(replacement.timestamp)
                            .with_linkage(linkage)
                            .with_header(replacement.header),
                    );
                }
                handle
            }
            None => {
                let handle = self.create_via_device(descriptor, Some(bytecode), linkage)?;
                let mut registry = self.registry.lock();
                registry.purge(handle);
                if hunting || self.deferred_consumers() > 0 {
                    registry.register_reload(
                        handle,
                        ReloadEntry::new(identity, BINARY_MODEL, bytecode)
                            .with_linkage(linkage)
                            .deferred_candidate(true),
                    );
                    if registry.original(handle).is_none() {
                        let shared = ShaderRef::shared(self.device.clone(), handle);
                        registry.retain_original(handle, shared);
                    }
                }
                handle
            }
        };

        if needs_original(&self.config, hunting, hash) {
            self.keep_original(descriptor, identity, live, bytecode, linkage);
        }

        self.registry.lock().record_identity(live, identity);
        debug!(%stage, handle = %live, hash = %format_args!("{hash:016x}"), "shader recorded");
        Ok(live)
    }

    /// Retains a separate object built from the unmodified bytecode under `live`.
    ///
    /// An original already retained for `live` is kept as is; that happens when no replacement
    /// was found and the live object itself is the original.
    fn keep_original(
        &self,
        descriptor: &StageDescriptor,
        identity: ShaderIdentity,
        live: ShaderHandle,
        bytecode: &[u8],
        linkage: Option<&ClassLinkage>,
    ) {
        let mut registry = self.registry.lock();
        if registry.original(live).is_some() {
            return;
        }
        info!(
            hash = %format_args!("{:016x}", identity.hash),
            stage = %identity.stage,
            "keeping original shader for filtering"
        );
        match self.create_via_device(descriptor, Some(bytecode), linkage) {
            Ok(original) => {
                registry.purge(original);
                registry.retain_original(live, ShaderRef::owned(self.device.clone(), original));
            }
            Err(err) => warn!(%err, "failed to create original shader for filtering"),
        }
    }

    fn create_via_device(
        &self,
        descriptor: &StageDescriptor,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError> {
        self.creation_mode
            .with_mode(&*self.device, self.config.surface_create_mode, || {
                (descriptor.create)(&*self.device, bytecode, linkage)
            })
    }
}
