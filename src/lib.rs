//! Shader interception and replacement for a wrapped graphics device.
//!
//! A [`ShaderSession`] sits between an application and its device. Each shader the application
//! creates is named by a 64-bit hash of its bytecode ([`hash`]). The [`Resolver`] looks for a
//! user-supplied fix under that name, either a cached binary, HLSL or assembly source, or an
//! auto-patched decompile. The live object is then built from the fix or from the original.
//! The [`ShaderRegistry`] remembers what was created so later tooling can reload, toggle, or
//! diff shaders.
//!
//! Disassembly, assembly, compilation and decompilation are supplied by the host through
//! [`tools`].

pub mod config;
pub mod crc32c;
pub mod device;
mod error;
pub mod hash;
pub mod identity;
mod interceptor;
pub mod policy;
pub mod registry;
pub mod resolver;
mod stage;
pub mod store;
pub mod tools;

pub use crate::config::{Config, ConfigError, HashMode};
pub use crate::device::{
    ClassLinkage, CreationModeLock, LinkageObject, Ownership, ShaderHandle, ShaderRef,
    StageDescriptor, UnderlyingDevice,
};
pub use crate::error::{PlatformError, ShaderFixError};
pub use crate::hash::shader_hash;
pub use crate::identity::{DeviceIdentityMap, IdentityKey, InterfaceView};
pub use crate::interceptor::ShaderSession;
pub use crate::registry::{ReloadEntry, ShaderIdentity, ShaderRegistry};
pub use crate::resolver::{Replacement, ReplacementOrigin, Resolver};
pub use crate::stage::ShaderStage;
pub use crate::tools::Toolchain;
