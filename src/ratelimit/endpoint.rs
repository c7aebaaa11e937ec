//! Endpoint signature normalization.
//!
//! Request paths that embed resource identifiers would otherwise create one
//! counter per resource instance. Normalization collapses those segments into a
//! placeholder so counters are kept per route shape instead.

/// Signature used for an empty path.
pub const ROOT_SIGNATURE: &str = "root";

/// Placeholder substituted for identifier-like segments.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Normalize a request path into an endpoint signature.
///
/// The first segment is kept verbatim (API version or namespace). Every later
/// segment that looks like an identifier is replaced by [`ID_PLACEHOLDER`].
/// Normalizing an already normalized signature returns it unchanged.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return ROOT_SIGNATURE.to_string();
    }

    let mut segments = trimmed.split('/');
    let mut signature = String::with_capacity(trimmed.len());

    if let Some(first) = segments.next() {
        signature.push_str(first);
    }

    for segment in segments {
        signature.push('/');
        if is_identifier(segment) {
            signature.push_str(ID_PLACEHOLDER);
        } else {
            signature.push_str(segment);
        }
    }

    signature
}

/// Returns `true` if a path segment looks like a resource identifier.
pub fn is_identifier(segment: &str) -> bool {
    is_integer(segment) || is_uuid_shaped(segment) || is_hex_object_id(segment)
}

fn is_integer(segment: &str) -> bool {
    segment.parse::<i64>().is_ok()
}

// Shape only: any 36 chars with exactly four hyphens, hex is not checked.
fn is_uuid_shaped(segment: &str) -> bool {
    segment.len() == 36 && segment.bytes().filter(|b| *b == b'-').count() == 4
}

fn is_hex_object_id(segment: &str) -> bool {
    matches!(segment.len(), 24 | 32) && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_root_paths() {
        assert_eq!(normalize(""), "root");
        assert_eq!(normalize("/"), "root");
        assert_eq!(normalize("///"), "root");
    }

    #[test]
    fn test_collection_path_unchanged() {
        assert_eq!(normalize("/v1/incidents"), "v1/incidents");
        assert_eq!(normalize("/v1/incidents/"), "v1/incidents");
    }

    #[test]
    fn test_uuid_segment_replaced() {
        let id = uuid::Uuid::new_v4().to_string();
        assert_eq!(normalize(&format!("/v1/incidents/{}", id)), "v1/incidents/{id}");
    }

    #[test]
    fn test_uuid_shape_is_not_hex_validated() {
        let not_hex = "zzzzzzzz-zzzz-zzzz-zzzz-zzzzzzzzzzzz";
        assert_eq!(not_hex.len(), 36);
        assert!(is_identifier(not_hex));
    }

    #[test]
    fn test_integer_segment_replaced() {
        assert_eq!(normalize("/v1/work-orders/456"), "v1/work-orders/{id}");
        assert_eq!(
            normalize("/v1/work-orders/456/notes/7"),
            "v1/work-orders/{id}/notes/{id}"
        );
    }

    #[test]
    fn test_hex_object_ids_replaced() {
        let object_id = "507f1f77bcf86cd799439011";
        let md5_like = "9e107d9d372bb6826bd81d3542a419d6";
        assert_eq!(normalize(&format!("/v2/assets/{}", object_id)), "v2/assets/{id}");
        assert_eq!(normalize(&format!("/v2/assets/{}", md5_like)), "v2/assets/{id}");
    }

    #[test]
    fn test_near_miss_hex_lengths_preserved() {
        // 23 and 25 hex characters
        assert!(!is_identifier("507f1f77bcf86cd79943901"));
        assert!(!is_identifier("507f1f77bcf86cd7994390111"));
        // 24 characters but not all hex
        assert!(!is_identifier("507f1f77bcf86cd79943901g"));
    }

    #[test]
    fn test_short_hyphenated_segment_preserved() {
        let short = "abcd-ef01-2345-6789";
        assert_eq!(short.len(), 19);
        assert_eq!(
            normalize(&format!("/v1/incidents/{}", short)),
            format!("v1/incidents/{}", short)
        );
    }

    #[test]
    fn test_first_segment_kept_verbatim() {
        assert_eq!(normalize("/42/items/7"), "42/items/{id}");
    }

    #[test]
    fn test_inner_empty_segments_preserved() {
        assert_eq!(normalize("/v1//incidents"), "v1//incidents");
    }

    #[test]
    fn test_normalize_is_idempotent_on_examples() {
        let paths = [
            "",
            "/",
            "/v1/incidents",
            "/v1/work-orders/456",
            "/v1/incidents/9f1b2c3d-1111-2222-3333-444455556666/comments",
            "v1/{id}/x",
            "/v1//a/",
        ];
        for path in paths {
            let once = normalize(path);
            assert_eq!(normalize(&once), once, "path {:?}", path);
        }
    }

    #[test]
    fn test_normalize_is_idempotent_on_random_paths() {
        const ALPHABET: &[u8] = b"abcdef0123456789-/xyz";
        let mut rng = rand::thread_rng();

        for _ in 0..2000 {
            let len = rng.gen_range(0..80);
            let path: String = (0..len)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            let once = normalize(&path);
            assert_eq!(normalize(&once), once, "path {:?}", path);
        }
    }
}
