use core::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One of the six programmable pipeline stages a shader object can be created for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    #[value(name = "vs", alias = "vertex")]
    Vertex,
    #[value(name = "ps", alias = "pixel")]
    Pixel,
    #[value(name = "gs", alias = "geometry")]
    Geometry,
    #[value(name = "hs", alias = "hull")]
    Hull,
    #[value(name = "ds", alias = "domain")]
    Domain,
    #[value(name = "cs", alias = "compute")]
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::Pixel,
        ShaderStage::Geometry,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Compute,
    ];

    /// Short tag used in artifact file names (`vs`, `ps`, ...).
    pub fn tag(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::Pixel => "ps",
            ShaderStage::Geometry => "gs",
            ShaderStage::Hull => "hs",
            ShaderStage::Domain => "ds",
            ShaderStage::Compute => "cs",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.tag() == tag)
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<shaderfix_dxbc::ProgramType> for ShaderStage {
    fn from(program: shaderfix_dxbc::ProgramType) -> Self {
        use shaderfix_dxbc::ProgramType;
        match program {
            ProgramType::Vertex => ShaderStage::Vertex,
            ProgramType::Pixel => ShaderStage::Pixel,
            ProgramType::Geometry => ShaderStage::Geometry,
            ProgramType::Hull => ShaderStage::Hull,
            ProgramType::Domain => ShaderStage::Domain,
            ProgramType::Compute => ShaderStage::Compute,
        }
    }
}
