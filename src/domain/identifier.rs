use serde_json::Value;
use uuid::{Uuid, Variant};

/// Length of an identifier in canonical 8-4-4-4-12 textual form.
pub const IDENTIFIER_LEN: usize = 36;

const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Result of normalizing an identifier.
///
/// A replaced identifier means the original key is gone for good: anything
/// still referencing it is orphaned, so callers must adopt the replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedId {
    Unchanged(String),
    Replaced { original: String, replacement: String },
}

impl NormalizedId {
    /// The identifier to use from now on.
    pub fn id(&self) -> &str {
        match self {
            NormalizedId::Unchanged(id) => id,
            NormalizedId::Replaced { replacement, .. } => replacement,
        }
    }

    pub fn was_replaced(&self) -> bool {
        matches!(self, NormalizedId::Replaced { .. })
    }
}

/// Generate a fresh random version-4 identifier.
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Returns true iff `token` is a canonical hyphenated UUID (case-insensitive)
/// with a version nibble in 1..=5 and the RFC 4122 variant.
pub fn is_valid(token: &str) -> bool {
    if token.len() != IDENTIFIER_LEN {
        return false;
    }

    let well_formed = token.bytes().enumerate().all(|(i, b)| {
        if HYPHEN_POSITIONS.contains(&i) {
            b == b'-'
        } else {
            b.is_ascii_hexdigit()
        }
    });
    if !well_formed {
        return false;
    }

    match Uuid::try_parse(token) {
        Ok(uuid) => {
            matches!(uuid.get_version_num(), 1..=5) && uuid.get_variant() == Variant::RFC4122
        }
        Err(_) => false,
    }
}

/// Like [`is_valid`] but for loosely-typed values; anything that is not a
/// string is rejected.
pub fn is_valid_value(value: &Value) -> bool {
    value.as_str().is_some_and(is_valid)
}

/// Keep a valid identifier, replace anything else with a fresh one.
pub fn normalize(token: &str) -> NormalizedId {
    if is_valid(token) {
        NormalizedId::Unchanged(token.to_string())
    } else {
        NormalizedId::Replaced {
            original: token.to_string(),
            replacement: generate(),
        }
    }
}

/// Derive a reproducible, UUID-shaped identifier from an arbitrary seed.
///
/// Fixtures only. This is two rounds of FNV-1a, so distinct seeds can
/// collide and the output is not uniformly distributed. Never use it for
/// production identity.
pub fn derive_test_identifier(seed: &str) -> String {
    let high = fnv1a(seed.as_bytes(), 0xcbf2_9ce4_8422_2325);
    let low = fnv1a(seed.as_bytes(), high ^ 0x9e37_79b9_7f4a_7c15);

    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&high.to_be_bytes());
    bytes[8..].copy_from_slice(&low.to_be_bytes());

    // Stamp version 4 and the RFC 4122 variant so the token passes is_valid.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes).to_string()
}

fn fnv1a(data: &[u8], offset: u64) -> u64 {
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    data.iter()
        .fold(offset, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}
