use core::fmt;

use crate::error::DxbcError;
use crate::fourcc::FourCC;

const DXBC_MAGIC: [u8; 4] = *b"DXBC";

/// Size of the fixed header: magic + digest + reserved + total_size + section_count.
pub const HEADER_LEN: usize = 4 + 16 + 4 + 4 + 4;

/// Byte offset of the 16-byte digest inside the header.
pub const DIGEST_OFFSET: usize = 4;

const SECTION_HEADER_LEN: usize = 8;

// Real shaders carry a handful of sections. The cap keeps hostile offset tables from turning
// into long validation loops.
const MAX_SECTION_COUNT: u32 = 4096;

/// The fixed header at the start of every DXBC container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Digest written by the compiler over the rest of the container.
    pub digest: [u8; 16],
    /// Declared size of the whole container.
    pub total_size: u32,
    /// Number of entries in the section offset table.
    pub section_count: u32,
}

impl ContainerHeader {
    /// The first eight digest bytes read as the compiler wrote them, with the most significant
    /// byte first. This is how `md5sum`-style tools print the value.
    pub fn digest_prefix_u64(&self) -> u64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.digest[..8]);
        u64::from_le_bytes(low).swap_bytes()
    }
}

/// One tagged section of a container.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    /// Section tag.
    pub tag: FourCC,
    /// Payload following the 8-byte section header.
    pub payload: &'a [u8],
}

impl fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("tag", &self.tag)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// A validated view over a DXBC container.
///
/// [`DxbcContainer::parse`] checks every offset and length up front, so iterating sections
/// afterwards cannot fail.
#[derive(Debug, Clone)]
pub struct DxbcContainer<'a> {
    bytes: &'a [u8],
    header: ContainerHeader,
    offsets: &'a [u8],
}

impl<'a> DxbcContainer<'a> {
    /// Parses `bytes` as a DXBC container.
    ///
    /// Bytes past the declared `total_size` are ignored.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DxbcError> {
        if bytes.len() < HEADER_LEN {
            return Err(DxbcError::TruncatedHeader {
                need: HEADER_LEN,
                got: bytes.len(),
            });
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != DXBC_MAGIC {
            return Err(DxbcError::BadMagic { found: magic });
        }

        let mut digest = [0u8; 16];
        digest.copy_from_slice(&bytes[DIGEST_OFFSET..DIGEST_OFFSET + 16]);
        let total_size = le_u32(bytes, 24);
        let section_count = le_u32(bytes, 28);

        if section_count > MAX_SECTION_COUNT {
            return Err(DxbcError::TooManySections {
                count: section_count,
                max: MAX_SECTION_COUNT,
            });
        }

        let declared = total_size as usize;
        if declared < HEADER_LEN || declared > bytes.len() {
            return Err(DxbcError::BadTotalSize {
                declared: total_size,
                available: bytes.len(),
            });
        }
        let bytes = &bytes[..declared];

        let table_end = HEADER_LEN + section_count as usize * 4;
        if table_end > bytes.len() {
            return Err(DxbcError::SectionOutOfBounds {
                index: 0,
                start: HEADER_LEN,
                end: table_end,
                len: bytes.len(),
            });
        }
        let offsets = &bytes[HEADER_LEN..table_end];

        for index in 0..section_count as usize {
            let offset = le_u32(offsets, index * 4) as usize;
            if offset < table_end {
                return Err(DxbcError::OverlappingSection { index, offset });
            }
            section_at(bytes, offset).ok_or_else(|| {
                let end = offset
                    .checked_add(SECTION_HEADER_LEN)
                    .and_then(|header_end| {
                        bytes
                            .get(offset + 4..header_end)
                            .map(|size| header_end.saturating_add(le_u32(size, 0) as usize))
                    })
                    .unwrap_or(usize::MAX);
                DxbcError::SectionOutOfBounds {
                    index,
                    start: offset,
                    end,
                    len: bytes.len(),
                }
            })?;
        }

        Ok(DxbcContainer {
            bytes,
            header: ContainerHeader {
                digest,
                total_size,
                section_count,
            },
            offsets,
        })
    }

    /// The parsed header.
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// The bytes covered by `total_size`.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Iterates sections in offset-table order.
    pub fn sections(&self) -> Sections<'a> {
        Sections {
            bytes: self.bytes,
            offsets: self.offsets,
            index: 0,
        }
    }

    /// First section carrying `tag`.
    pub fn section(&self, tag: FourCC) -> Option<Section<'a>> {
        self.sections().find(|s| s.tag == tag)
    }

    /// First `SHEX` or `SHDR` section.
    pub fn shader_section(&self) -> Option<Section<'a>> {
        const SHEX: FourCC = FourCC::new(b"SHEX");
        const SHDR: FourCC = FourCC::new(b"SHDR");
        self.sections().find(|s| s.tag == SHEX || s.tag == SHDR)
    }

    /// One line per section, for tooling output.
    pub fn summary(&self) -> String {
        use core::fmt::Write as _;

        let mut out = format!(
            "DXBC total_size={} sections={}",
            self.header.total_size, self.header.section_count
        );
        for (idx, section) in self.sections().enumerate() {
            let _ = write!(
                out,
                "\n  [{idx:02}] {} {} bytes",
                section.tag,
                section.payload.len()
            );
        }
        out
    }
}

/// Iterator returned by [`DxbcContainer::sections`].
#[derive(Debug, Clone)]
pub struct Sections<'a> {
    bytes: &'a [u8],
    offsets: &'a [u8],
    index: usize,
}

impl<'a> Iterator for Sections<'a> {
    type Item = Section<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.offsets.get(self.index * 4..self.index * 4 + 4)?;
        self.index += 1;
        section_at(self.bytes, le_u32(entry, 0) as usize)
    }
}

fn section_at(bytes: &[u8], offset: usize) -> Option<Section<'_>> {
    let header_end = offset.checked_add(SECTION_HEADER_LEN)?;
    let header = bytes.get(offset..header_end)?;
    let tag = FourCC([header[0], header[1], header[2], header[3]]);
    let len = le_u32(header, 4) as usize;
    let payload = bytes.get(header_end..header_end.checked_add(len)?)?;
    Some(Section { tag, payload })
}

// Callers guarantee `offset + 4 <= bytes.len()`.
fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
