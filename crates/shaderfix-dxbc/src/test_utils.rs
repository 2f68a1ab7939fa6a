use crate::container::HEADER_LEN;
use crate::FourCC;

/// Builds a structurally valid DXBC container holding `sections` in order.
///
/// The digest is left zeroed; use [`build_container_with_digest`] when a test needs a specific
/// embedded value.
pub fn build_container(sections: &[(FourCC, &[u8])]) -> Vec<u8> {
    build_container_with_digest([0u8; 16], sections)
}

/// Like [`build_container`] but with an explicit 16-byte digest.
pub fn build_container_with_digest(digest: [u8; 16], sections: &[(FourCC, &[u8])]) -> Vec<u8> {
    let table_len = 4 * sections.len();
    let payload_len: usize = sections.iter().map(|(_, data)| 8 + data.len()).sum();
    let mut out = Vec::with_capacity(HEADER_LEN + table_len + payload_len);

    out.extend_from_slice(b"DXBC");
    out.extend_from_slice(&digest);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // total_size, patched below
    let count = u32::try_from(sections.len()).expect("section count fits in u32");
    out.extend_from_slice(&count.to_le_bytes());

    let table_pos = out.len();
    out.resize(table_pos + table_len, 0);

    for (i, (tag, data)) in sections.iter().enumerate() {
        let offset = u32::try_from(out.len()).expect("section offset fits in u32");
        out[table_pos + i * 4..table_pos + i * 4 + 4].copy_from_slice(&offset.to_le_bytes());
        let len = u32::try_from(data.len()).expect("section size fits in u32");
        out.extend_from_slice(&tag.0);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(data);
    }

    let total = u32::try_from(out.len()).expect("total_size fits in u32");
    out[24..28].copy_from_slice(&total.to_le_bytes());
    out
}
