//! Storage codec trait definitions.

use cellar_core::Result;

/// Storage codec trait.
///
/// All record payloads pass through the codec on their way to and from the
/// store.
///
/// # Thread Safety
///
/// Codecs must be `Send + Sync`: the writer encodes while concurrent readers
/// decode.
pub trait StorageCodec: Send + Sync {
    /// Encode `data` stored under `key`.
    ///
    /// The returned bytes are what gets written to the store.
    fn encode(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Decode bytes read from `key`.
    ///
    /// Reverses the encode operation. Returns an error if the data
    /// cannot be decoded (e.g., decryption failure, corruption).
    fn decode(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Unique codec identifier.
    fn codec_id(&self) -> &str;
}
