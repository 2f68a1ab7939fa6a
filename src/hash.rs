//! Shader identity.
//!
//! Every mode is total: malformed or truncated input falls back to [`fnv64`] rather than
//! failing, so the interceptor always has a name to look artifacts up under.

use shaderfix_dxbc::{DxbcContainer, FourCC, HEADER_LEN};
use tracing::debug;

use crate::config::HashMode;
use crate::crc32c::crc32c_append;

const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Sections that carry the program and its interface. Compiler version (`RDEF`), debug
/// paths (`SDBG`) and statistics (`STAT`) are left out so a rebuild on another machine keeps
/// the same identity.
pub const WHITELISTED_SECTIONS: [FourCC; 9] = [
    FourCC::new(b"SHDR"),
    FourCC::new(b"SHEX"),
    FourCC::new(b"ISGN"),
    FourCC::new(b"ISG1"),
    FourCC::new(b"PCSG"),
    FourCC::new(b"PSG1"),
    FourCC::new(b"OSGN"),
    FourCC::new(b"OSG5"),
    FourCC::new(b"OSG1"),
];

/// FNV-1 with a zero offset basis. Existing fix packs are named with this exact variant.
#[must_use]
pub fn fnv64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |hval, &byte| {
        hval.wrapping_mul(FNV_64_PRIME) ^ u64::from(byte)
    })
}

/// Computes a shader's identity under `mode`.
pub fn shader_hash(mode: HashMode, bytecode: &[u8]) -> u64 {
    if bytecode.len() < HEADER_LEN {
        return fnv_logged(bytecode);
    }
    match mode {
        HashMode::Fnv => fnv_logged(bytecode),
        HashMode::Embedded => {
            let hash = embedded_digest(bytecode);
            debug!(hash = %format_args!("{hash:016x}"), "embedded shader hash");
            hash
        }
        HashMode::Bytecode => match bytecode_hash(bytecode) {
            Some(hash) => {
                debug!(hash = %format_args!("{hash:016x}"), "bytecode shader hash");
                hash
            }
            None => fnv_logged(bytecode),
        },
    }
}

/// The [`HashMode::Bytecode`] identity, or `None` where that mode falls back to [`fnv64`]:
/// the blob is shorter than a header, does not parse, or its whitelist CRC is zero.
pub fn bytecode_hash(bytecode: &[u8]) -> Option<u64> {
    if bytecode.len() < HEADER_LEN {
        return None;
    }
    whitelist_crc(bytecode)
        .filter(|&crc| crc != 0)
        .map(u64::from)
}

fn fnv_logged(bytecode: &[u8]) -> u64 {
    let hash = fnv64(bytecode);
    debug!(hash = %format_args!("{hash:016x}"), "fnv shader hash");
    hash
}

// The header is read without validating the magic; callers checked the length.
fn embedded_digest(bytecode: &[u8]) -> u64 {
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytecode[4..12]);
    u64::from_le_bytes(low).swap_bytes()
}

/// CRC-32C chained over the payload of every whitelisted section, in table order.
///
/// Returns `None` when the container does not parse.
pub fn whitelist_crc(bytecode: &[u8]) -> Option<u32> {
    let container = DxbcContainer::parse(bytecode).ok()?;
    Some(
        container
            .sections()
            .filter(|section| WHITELISTED_SECTIONS.contains(&section.tag))
            .fold(0, |crc, section| crc32c_append(crc, section.payload)),
    )
}
