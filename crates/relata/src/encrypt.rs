//! Encryption strategy for encrypted properties.

use relata_core::Result;

/// Encrypts property values on their way to the driver and decrypts them on
/// hydration. Values are handed over in their text form.
pub trait Encrypter: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}
