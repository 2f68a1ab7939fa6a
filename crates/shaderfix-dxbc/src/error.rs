use thiserror::Error;

/// Reasons a blob could not be read as a DXBC container.
///
/// Every variant carries enough context to log which field was rejected. None of them are
/// produced by panicking paths: the parser only ever slices through checked ranges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DxbcError {
    /// The blob is shorter than the fixed container header.
    #[error("truncated header: need {need} bytes, got {got}")]
    TruncatedHeader {
        /// Header size in bytes.
        need: usize,
        /// Length of the buffer that was supplied.
        got: usize,
    },

    /// The first four bytes are not `DXBC`.
    #[error("bad magic {found:02x?}, expected \"DXBC\"")]
    BadMagic {
        /// The bytes found at offset 0.
        found: [u8; 4],
    },

    /// The declared container size is inconsistent with the header or buffer.
    #[error("declared total_size {declared} is invalid for a {available}-byte buffer")]
    BadTotalSize {
        /// `total_size` field from the header.
        declared: u32,
        /// Bytes actually available.
        available: usize,
    },

    /// The section count is larger than any real shader would use.
    #[error("section count {count} exceeds maximum {max}")]
    TooManySections {
        /// Declared section count.
        count: u32,
        /// Parser limit.
        max: u32,
    },

    /// A section offset points into the header or offset table.
    #[error("section {index} offset {offset} overlaps the container header")]
    OverlappingSection {
        /// Index in the offset table.
        index: usize,
        /// Offending offset.
        offset: usize,
    },

    /// A section header or payload extends past the end of the container.
    #[error("section {index} at {start}..{end} is outside the {len}-byte container")]
    SectionOutOfBounds {
        /// Index in the offset table.
        index: usize,
        /// First byte of the out-of-range region.
        start: usize,
        /// One past the last byte of the out-of-range region.
        end: usize,
        /// Container length.
        len: usize,
    },

    /// The container has no `SHDR`/`SHEX` section.
    #[error("container has no shader bytecode section (SHDR/SHEX)")]
    MissingShaderSection,

    /// The shader section is too short to hold a version token.
    #[error("shader section is {len} bytes, too short for a version token")]
    TruncatedShaderSection {
        /// Length of the payload.
        len: usize,
    },

    /// The version token names a program type that is not one of the six pipeline stages.
    #[error("unknown program type {0} in version token")]
    UnknownProgramType(u32),
}
