//! Salted PBKDF2-HMAC-SHA256 password hashing.
//!
//! Stored form: `hex(salt)$hex(derived_key)`. The delimiter can never occur in
//! either field because both are hex.

use rand::RngCore;
use subtle::ConstantTimeEq;

/// PBKDF2 iteration count. Intentionally slow; never lower this.
pub const PBKDF2_ITERATIONS: u32 = 200_000;

/// Salt byte length for password hashing.
pub const SALT_BYTES: usize = 16;

/// Derived key length (one SHA-256 block).
pub const KEY_BYTES: usize = 32;

const DELIMITER: char = '$';

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    hash_password_with_salt(password, &generate_salt())
}

/// Hash a password with a caller-supplied salt.
pub fn hash_password_with_salt(password: &str, salt: &[u8]) -> String {
    let key = derive_key(password, salt, PBKDF2_ITERATIONS);
    format!("{}{DELIMITER}{}", hex::encode(salt), hex::encode(key))
}

/// Check `password` against a stored `salt$hash` string.
///
/// Malformed input of any kind yields `false`.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, hash_hex)) = stored.split_once(DELIMITER) else {
        return false;
    };
    if hash_hex.contains(DELIMITER) {
        return false;
    }
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };

    let candidate = hex::encode(derive_key(password, &salt, PBKDF2_ITERATIONS));
    candidate.as_bytes().ct_eq(hash_hex.as_bytes()).into()
}

/// Derive a 256-bit key from a password using PBKDF2-HMAC-SHA256.
fn derive_key(password: &str, salt: &[u8], rounds: u32) -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, rounds, &mut key);
    key
}

/// Generate a random salt from the OS RNG.
fn generate_salt() -> [u8; SALT_BYTES] {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
