//! Shader model decoding from the SM4/SM5 version token.
//!
//! The first DWORD of a `SHDR`/`SHEX` payload encodes the program type in bits 16..32 and the
//! model version in the low byte (minor in bits 0..4, major in bits 4..8).

use core::fmt;

use crate::container::DxbcContainer;
use crate::error::DxbcError;

/// Pipeline role encoded in the version token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramType {
    Pixel,
    Vertex,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl ProgramType {
    fn from_raw(raw: u32) -> Result<Self, DxbcError> {
        Ok(match raw {
            0 => ProgramType::Pixel,
            1 => ProgramType::Vertex,
            2 => ProgramType::Geometry,
            3 => ProgramType::Hull,
            4 => ProgramType::Domain,
            5 => ProgramType::Compute,
            other => return Err(DxbcError::UnknownProgramType(other)),
        })
    }

    /// Two-letter prefix used in compiler target strings (`ps`, `vs`, ...).
    pub fn prefix(self) -> &'static str {
        match self {
            ProgramType::Pixel => "ps",
            ProgramType::Vertex => "vs",
            ProgramType::Geometry => "gs",
            ProgramType::Hull => "hs",
            ProgramType::Domain => "ds",
            ProgramType::Compute => "cs",
        }
    }
}

/// A decoded shader model such as `ps_5_0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderModel {
    pub program: ProgramType,
    pub major: u8,
    pub minor: u8,
}

impl ShaderModel {
    /// Decodes a raw version token.
    pub fn from_token(token: u32) -> Result<Self, DxbcError> {
        Ok(ShaderModel {
            program: ProgramType::from_raw(token >> 16)?,
            major: ((token >> 4) & 0xf) as u8,
            minor: (token & 0xf) as u8,
        })
    }

    /// Reads the version token from the container's shader section.
    pub fn from_container(container: &DxbcContainer<'_>) -> Result<Self, DxbcError> {
        let section = container
            .shader_section()
            .ok_or(DxbcError::MissingShaderSection)?;
        let token = section
            .payload
            .get(..4)
            .ok_or(DxbcError::TruncatedShaderSection {
                len: section.payload.len(),
            })?;
        Self::from_token(u32::from_le_bytes([token[0], token[1], token[2], token[3]]))
    }

    /// Encodes the model back into a version token (used to build test shaders).
    pub fn to_token(self) -> u32 {
        let program = match self.program {
            ProgramType::Pixel => 0,
            ProgramType::Vertex => 1,
            ProgramType::Geometry => 2,
            ProgramType::Hull => 3,
            ProgramType::Domain => 4,
            ProgramType::Compute => 5,
        };
        (program << 16) | (u32::from(self.major & 0xf) << 4) | u32::from(self.minor & 0xf)
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.program.prefix(), self.major, self.minor)
    }
}
