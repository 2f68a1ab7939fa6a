//! A bounds-checked reader for compiled Direct3D shader containers (`DXBC`).
//!
//! Shader blobs arrive from an application we do not control, so parsing never panics and
//! never reads outside the buffer. Besides walking the section table this crate exposes the
//! embedded compiler digest and decodes the shader model from the bytecode version token.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod container;
mod error;
mod fourcc;
/// Shader model decoding.
#[allow(missing_docs)]
pub mod version;

/// Helpers for building synthetic containers in tests.
///
/// Available to this crate's own tests, or to dependents that enable `test-utils`.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::container::{ContainerHeader, DxbcContainer, Section, Sections, HEADER_LEN};
pub use crate::error::DxbcError;
pub use crate::fourcc::FourCC;
pub use crate::version::{ProgramType, ShaderModel};
