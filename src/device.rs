//! The seam to the real graphics device.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::PlatformError;
use crate::stage::ShaderStage;

/// Opaque identity of a created stage object.
///
/// The platform may hand out the same value again once an object is destroyed, and that
/// destruction is not observed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u64);

impl fmt::Display for ShaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A class-linkage object created by the device.
pub trait LinkageObject: fmt::Debug + Send + Sync {}

/// Linkage objects are shared with the caller; every clone is one reference.
pub type ClassLinkage = Arc<dyn LinkageObject>;

/// Object creation and reference counting as the platform exposes them.
///
/// Create calls accept absent bytecode so the platform reports its own error for it. A
/// returned handle carries one reference owned by whoever asked for it.
pub trait UnderlyingDevice: Send + Sync {
    fn create_vertex_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError>;
    fn create_pixel_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError>;
    fn create_geometry_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError>;
    fn create_hull_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError>;
    fn create_domain_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError>;
    fn create_compute_shader(
        &self,
        bytecode: Option<&[u8]>,
        linkage: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError>;

    fn create_class_linkage(&self) -> Result<ClassLinkage, PlatformError>;

    /// Returns the new reference count.
    fn add_ref(&self, handle: ShaderHandle) -> u32;
    /// Returns the remaining reference count.
    fn release(&self, handle: ShaderHandle) -> u32;

    /// Switches the global stereo surface creation mode, returning the previous mode.
    ///
    /// Devices without stereo support keep the default, which does nothing.
    fn set_surface_creation_mode(&self, _mode: i32) -> Option<i32> {
        None
    }
}

pub type CreateFn = fn(
    &dyn UnderlyingDevice,
    Option<&[u8]>,
    Option<&ClassLinkage>,
) -> Result<ShaderHandle, PlatformError>;

/// Per-stage dispatch into [`UnderlyingDevice`].
///
/// The same entry point creates both the live object and any separately retained original.
#[derive(Clone, Copy)]
pub struct StageDescriptor {
    pub stage: ShaderStage,
    pub create: CreateFn,
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

macro_rules! stage_create_fns {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            fn $name(
                device: &dyn UnderlyingDevice,
                bytecode: Option<&[u8]>,
                linkage: Option<&ClassLinkage>,
            ) -> Result<ShaderHandle, PlatformError> {
                device.$method(bytecode, linkage)
            }
        )*
    };
}

stage_create_fns! {
    create_vertex => create_vertex_shader,
    create_pixel => create_pixel_shader,
    create_geometry => create_geometry_shader,
    create_hull => create_hull_shader,
    create_domain => create_domain_shader,
    create_compute => create_compute_shader,
}

static DESCRIPTORS: [StageDescriptor; 6] = [
    StageDescriptor {
        stage: ShaderStage::Vertex,
        create: create_vertex,
    },
    StageDescriptor {
        stage: ShaderStage::Pixel,
        create: create_pixel,
    },
    StageDescriptor {
        stage: ShaderStage::Geometry,
        create: create_geometry,
    },
    StageDescriptor {
        stage: ShaderStage::Hull,
        create: create_hull,
    },
    StageDescriptor {
        stage: ShaderStage::Domain,
        create: create_domain,
    },
    StageDescriptor {
        stage: ShaderStage::Compute,
        create: create_compute,
    },
];

impl StageDescriptor {
    pub fn of(stage: ShaderStage) -> &'static StageDescriptor {
        match stage {
            ShaderStage::Vertex => &DESCRIPTORS[0],
            ShaderStage::Pixel => &DESCRIPTORS[1],
            ShaderStage::Geometry => &DESCRIPTORS[2],
            ShaderStage::Hull => &DESCRIPTORS[3],
            ShaderStage::Domain => &DESCRIPTORS[4],
            ShaderStage::Compute => &DESCRIPTORS[5],
        }
    }
}

/// How a stored reference to a stage object is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Borrowed; never released from here.
    View,
    /// The sole reference from a create call that was stored and never returned.
    Owned,
    /// An extra reference taken because the object is both stored and returned to the caller.
    Shared,
}

/// A stage object held by the registry. Dropping it releases whatever [`Ownership`] says it holds.
pub struct ShaderRef {
    handle: ShaderHandle,
    ownership: Ownership,
    device: Arc<dyn UnderlyingDevice>,
}

impl ShaderRef {
    pub fn view(device: Arc<dyn UnderlyingDevice>, handle: ShaderHandle) -> Self {
        Self {
            handle,
            ownership: Ownership::View,
            device,
        }
    }

    /// Takes over the reference returned by a create call.
    pub fn owned(device: Arc<dyn UnderlyingDevice>, handle: ShaderHandle) -> Self {
        Self {
            handle,
            ownership: Ownership::Owned,
            device,
        }
    }

    /// Takes an additional reference so the caller's copy and this one are independent.
    pub fn shared(device: Arc<dyn UnderlyingDevice>, handle: ShaderHandle) -> Self {
        device.add_ref(handle);
        Self {
            handle,
            ownership: Ownership::Shared,
            device,
        }
    }

    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }
}

impl fmt::Debug for ShaderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderRef")
            .field("handle", &self.handle)
            .field("ownership", &self.ownership)
            .finish()
    }
}

impl Drop for ShaderRef {
    fn drop(&mut self) {
        match self.ownership {
            Ownership::View => {}
            Ownership::Owned | Ownership::Shared => {
                self.device.release(self.handle);
            }
        }
    }
}

/// Serializes create calls that depend on the global stereo surface creation mode.
#[derive(Debug, Default)]
pub struct CreationModeLock {
    lock: Mutex<()>,
}

impl CreationModeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `create` with the surface creation mode switched to `mode`, then restores it.
    ///
    /// With no mode configured nothing is locked.
    pub fn with_mode<T>(
        &self,
        device: &dyn UnderlyingDevice,
        mode: Option<i32>,
        create: impl FnOnce() -> T,
    ) -> T {
        let Some(mode) = mode else {
            return create();
        };
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = device.set_surface_creation_mode(mode);
        let out = create();
        if let Some(previous) = previous {
            device.set_surface_creation_mode(previous);
        }
        out
    }
}
