//! Shader toolchain collaborators.
//!
//! The interception core never parses shader assembly or HLSL itself. It drives these traits,
//! and the host plugs in the real disassembler, assembler, compiler and decompiler.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("disassembly failed: {0}")]
    Disassemble(String),
    #[error("assembly failed: {0}")]
    Assemble(String),
    #[error("decompilation failed: {0}")]
    Decompile(String),
}

/// A single recoverable complaint from the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for AssemblerParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Assembler output. Bytecode is produced even when some lines failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub bytecode: Vec<u8>,
    pub parse_errors: Vec<AssemblerParseError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compiled {
    /// `None` when compilation failed.
    pub bytecode: Option<Vec<u8>>,
    /// Warnings and errors, verbatim.
    pub diagnostics: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecompileOptions {
    pub fix_sv_position: bool,
    pub recompile_all_vs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompiled {
    pub hlsl: String,
    /// The auto-patcher changed something.
    pub patched: bool,
    /// Compiler target detected from the bytecode, e.g. `vs_5_0`.
    pub shader_model: String,
}

pub trait Disassembler: Send + Sync {
    fn disassemble(&self, bytecode: &[u8]) -> Result<String, ToolError>;
}

pub trait Assembler: Send + Sync {
    /// Assembles `text`. `original` supplies the signature sections when the text lacks them.
    fn assemble(
        &self,
        text: &str,
        original: &[u8],
        parse_signature_comments: bool,
    ) -> Result<Assembled, ToolError>;
}

pub trait HlslCompiler: Send + Sync {
    /// Compiles `source` for `target` with entry point `entry`. `source_path` resolves relative
    /// includes.
    fn compile(&self, source: &str, source_path: &Path, entry: &str, target: &str) -> Compiled;
}

pub trait Decompiler: Send + Sync {
    fn decompile(
        &self,
        bytecode: &[u8],
        disassembly: &str,
        options: DecompileOptions,
    ) -> Result<Decompiled, ToolError>;
}

/// The full set of collaborators a [`crate::Resolver`] needs.
pub struct Toolchain {
    pub disassembler: Box<dyn Disassembler>,
    pub assembler: Box<dyn Assembler>,
    pub compiler: Box<dyn HlslCompiler>,
    pub decompiler: Box<dyn Decompiler>,
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}

/// First line of a disassembly that is neither blank nor a `//` comment, e.g. `ps_5_0`.
pub fn shader_model_from_disassembly(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("//"))
}

/// First line of a source file, without its terminator.
pub fn header_line(text: &str) -> &str {
    let line = text.split('\n').next().unwrap_or_default();
    line.strip_suffix('\r').unwrap_or(line)
}
