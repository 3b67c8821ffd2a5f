//! Identifier normalization
//!
//! Arrays put hard limits on object names. These helpers map user-facing
//! names onto what each family accepts, and build/split the composite volume
//! handles handed back to the orchestrator.

/// Maximum LUN name length on OceanStor arrays
pub const OCEANSTOR_LUN_NAME_MAX_LEN: usize = 22;

/// Maximum volume name length on FusionStorage
pub const FUSIONSTORAGE_NAME_MAX_LEN: usize = 95;

/// Separator between backend and volume name in a volume handle
pub const HANDLE_SEPARATOR: char = '.';

/// Truncate `name` to at most `max_len` characters.
///
/// Truncation is silent; two long names sharing a prefix collide.
pub fn normalize_identifier(name: &str, max_len: usize) -> &str {
    match name.char_indices().nth(max_len) {
        Some((byte_idx, _)) => &name[..byte_idx],
        None => name,
    }
}

/// Filesystem names may not contain `-`
pub fn normalize_filesystem_name(name: &str) -> String {
    name.replace('-', "_")
}

/// Share path exported for a filesystem
pub fn normalize_share_path(name: &str) -> String {
    format!("/{}/", normalize_filesystem_name(name))
}

/// Build `<backend><sep><volume>`
pub fn compose_handle(backend: &str, volume: &str, separator: char) -> String {
    format!("{}{}{}", backend, separator, volume)
}

/// Split a composite id on the first `separator`.
///
/// Without a separator the first component is empty and the whole id is the
/// second.
pub fn split_composite_id(id: &str, separator: char) -> (&str, &str) {
    match id.split_once(separator) {
        Some((backend, volume)) => (backend, volume),
        None => ("", id),
    }
}

/// Number of `unit`-sized allocation units needed to hold `bytes`
pub fn round_up_size(bytes: u64, unit: u64) -> u64 {
    let units = bytes / unit;
    if bytes % unit > 0 {
        units + 1
    } else {
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation() {
        let long: String = "a".repeat(100) + &"b".repeat(20);
        assert_eq!(long.len(), 120);

        let normalized = normalize_identifier(&long, FUSIONSTORAGE_NAME_MAX_LEN);
        assert_eq!(normalized.len(), 95);
        assert_eq!(normalized, &long[..95]);

        assert_eq!(normalize_identifier("pvc-abcdef", 95), "pvc-abcdef");
        assert_eq!(normalize_identifier("pvc-abcdef", 10), "pvc-abcdef");
        assert_eq!(normalize_identifier("pvc-abcdef", 3), "pvc");
    }

    #[test]
    fn test_truncation_counts_characters() {
        assert_eq!(normalize_identifier("ééééé", 3), "ééé");
    }

    #[test]
    fn test_filesystem_name_idempotent() {
        let once = normalize_filesystem_name("pvc-1234-abcd");
        assert_eq!(once, "pvc_1234_abcd");
        assert_eq!(normalize_filesystem_name(&once), once);

        let path = normalize_share_path("pvc-1");
        assert_eq!(path, "/pvc_1/");
        assert_eq!(normalize_share_path("pvc_1"), path);
    }

    #[test]
    fn test_split_composite_id() {
        assert_eq!(split_composite_id("backendA-vol-123", '-'), ("backendA", "vol-123"));
        assert_eq!(split_composite_id("array1.pvc.x", '.'), ("array1", "pvc.x"));
        assert_eq!(split_composite_id("pvc-only", '.'), ("", "pvc-only"));
    }

    #[test]
    fn test_handle_round_trip() {
        let handle = compose_handle("backendA", "vol-123", '-');
        assert_eq!(handle, "backendA-vol-123");
        assert_eq!(split_composite_id(&handle, '-'), ("backendA", "vol-123"));

        let handle = compose_handle("array1", "pvc-1", HANDLE_SEPARATOR);
        assert_eq!(split_composite_id(&handle, HANDLE_SEPARATOR), ("array1", "pvc-1"));
    }

    #[test]
    fn test_round_up_size() {
        let mib = 1024 * 1024;
        let gib = 1024 * mib;
        assert_eq!(round_up_size(1500 * mib, gib), 2);
        assert_eq!(round_up_size(2 * gib, gib), 2);
        assert_eq!(round_up_size(1, 512), 1);
        assert_eq!(round_up_size(0, 512), 0);
    }
}
