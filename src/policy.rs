use crate::config::{Config, DepthBufferFilter, MarkingMode};

/// Whether a separate object built from the unmodified bytecode must be kept for `hash`.
///
/// Hunting needs it to show or reload the original. Outside hunting, only per-shader depth
/// filters and partner pairing do.
pub fn needs_original(config: &Config, hunting: bool, hash: u64) -> bool {
    if hunting
        && (config.marking_mode == MarkingMode::Original
            || config.config_reloadable
            || config.show_original_enabled)
    {
        return true;
    }

    match config.shader_override(hash) {
        Some(entry) => {
            matches!(
                entry.depth_filter,
                DepthBufferFilter::DepthActive | DepthBufferFilter::DepthInactive
            ) || entry.partner.is_some()
        }
        None => false,
    }
}
