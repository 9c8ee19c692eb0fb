//! Salted device hashing for approximate unique-visitor counting

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::OnceLock;

/// Global salt for device hashing
static DEVICE_SALT: OnceLock<Vec<u8>> = OnceLock::new();

/// Separator between MAC input fields, so field boundaries cannot be shifted
/// by crafted identifiers.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Number of MAC bytes kept per hash. 8 bytes keeps stored keys short while
/// collisions stay negligible at per-day cardinalities.
const HASH_BYTES: usize = 8;

/// Initialize the device hash salt.
/// If salt is None, generates a random one (WARNING: hashes won't be stable
/// across restarts, so the same device may be counted again after a deploy)
pub fn init_device_salt(salt: Option<&str>) {
    let key = if let Some(s) = salt {
        s.as_bytes().to_vec()
    } else {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..32).map(|_| rng.random::<u8>()).collect()
    };

    DEVICE_SALT.get_or_init(|| key);
}

/// Get the salt, initializing with a random one if not already set
fn get_device_salt() -> &'static [u8] {
    DEVICE_SALT.get_or_init(|| {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..32).map(|_| rng.random::<u8>()).collect()
    })
}

/// Derive the salted hash for one (entity, day, device) triple.
///
/// Scoping the MAC input to entity and day means the same device produces
/// unlinkable hashes across entities and across days, and raw device
/// identifiers never reach storage. Returns the first 8 MAC bytes as
/// 16 hex characters.
pub fn device_hash(entity_id: &str, day: &str, device_id: &str) -> Result<String> {
    let key = get_device_salt();
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;

    mac.update(entity_id.as_bytes());
    mac.update(&[FIELD_SEPARATOR]);
    mac.update(day.as_bytes());
    mac.update(&[FIELD_SEPARATOR]);
    mac.update(device_id.as_bytes());

    let digest = mac.finalize().into_bytes();
    Ok(hex::encode(&digest[..HASH_BYTES]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_salt() {
        init_device_salt(Some("test_salt_for_device_hashing"));
    }

    #[test]
    fn test_device_hash_is_deterministic() {
        init_test_salt();

        let a = device_hash("ent_1", "2024-03-07", "device-abc").unwrap();
        let b = device_hash("ent_1", "2024-03-07", "device-abc").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_device_hash_scopes_by_entity_and_day() {
        init_test_salt();

        let base = device_hash("ent_1", "2024-03-07", "device-abc").unwrap();
        let other_entity = device_hash("ent_2", "2024-03-07", "device-abc").unwrap();
        let other_day = device_hash("ent_1", "2024-03-08", "device-abc").unwrap();

        assert_ne!(base, other_entity);
        assert_ne!(base, other_day);
    }

    #[test]
    fn test_field_boundaries_cannot_shift() {
        init_test_salt();

        // Without separators these two would collapse to the same input.
        let a = device_hash("ab", "2024-03-07", "device").unwrap();
        let b = device_hash("a", "b2024-03-07", "device").unwrap();
        assert_ne!(a, b);
    }
}
