//! Storage codec abstraction.
//!
//! Every record payload passing through the write path goes through a codec
//! before it reaches the store, and through the same codec on the way back.
//! The codec receives the store key so implementations can bind ciphertext
//! to the key it was written under.
//!
//! # Usage
//!
//! ```
//! use cellar_storage::codec::{RecordCipher, StorageCodec};
//!
//! let codec = RecordCipher::new([7u8; 32]);
//! let encoded = codec.encode(b"users/1", b"hello world").unwrap();
//! let decoded = codec.decode(b"users/1", &encoded).unwrap();
//!
//! assert_eq!(decoded, b"hello world");
//! ```

mod cipher;
mod traits;

pub use cipher::{RecordCipher, MIN_CIPHERTEXT_LEN, SEED_SIZE, TAG_SIZE};
pub use traits::StorageCodec;
