//! Process-wide diagnostic flag.
//!
//! Toggled by the `debugon`/`debugoff` orchestrator directives. When set, the
//! transport logs every packet and reply.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Whether packet-level diagnostics are on.
pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Switch packet-level diagnostics on or off.
pub fn set_debug(enabled: bool) {
    let previous = DEBUG.swap(enabled, Ordering::Relaxed);
    if previous != enabled {
        tracing::info!(enabled, "Diagnostic mode changed");
    }
}

/// Hex dump of at most `limit` leading bytes, with the tail marked.
pub(crate) fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let mut out = bytes
        .iter()
        .take(limit)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > limit {
        out.push_str(&format!(" ... ({} bytes)", bytes.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_toggle() {
        set_debug(true);
        assert!(debug_enabled());
        set_debug(false);
        assert!(!debug_enabled());
    }

    #[test]
    fn test_hex_preview_truncates() {
        assert_eq!(hex_preview(&[0x41, 0x43, 0x4b, 0], 8), "41 43 4b 00");
        assert_eq!(hex_preview(&[1, 2, 3], 2), "01 02 ... (3 bytes)");
    }
}
