//! Persisted key layout
//!
//! Every key the database writes to the underlying store is built here.
//!
//! ```text
//! [0x00] "collection/" name                             collection metadata
//! [0x01] cid(8) [0x00] id                                record payload
//! [0x01] cid(8) [0x01] iid(8) encoded id len(u16)        index entry
//! [0x01] cid(8) [0x02] key                               full-text adapter
//! [0x01] cid(8) [0x03] id                                TTL back-reference
//! [0x02] time(12) kind target                            TTL queue, time ordered
//! [0x03] len(u16) file_id chunk(u32)                     file chunk
//! [0x04] file_id                                         file TTL back-reference
//! ```
//!
//! Collection and index ids are XXH3 hashes of their names, so two names can
//! collide; callers check for that when registering a name.

use chrono::{DateTime, Utc};
use xxhash_rust::xxh3::xxh3_64;

use crate::codec;
use crate::value::{Value, ValueType};

/// Leading byte of the metadata keyspace
pub const META_PREFIX: u8 = 0x00;
/// Leading byte of every collection keyspace
pub const COLLECTION_PREFIX: u8 = 0x01;
/// Leading byte of the TTL queue
pub const TTL_PREFIX: u8 = 0x02;
/// Leading byte of file chunks
pub const FILE_PREFIX: u8 = 0x03;
/// Leading byte of file TTL back-references
pub const FILE_TTL_REF_PREFIX: u8 = 0x04;

/// Longest record id, file id or collection name in bytes.
///
/// Keys carry these lengths as a big-endian `u16`.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

const RECORD_TAG: u8 = 0x00;
const INDEX_TAG: u8 = 0x01;
const KV_TAG: u8 = 0x02;
const TTL_REF_TAG: u8 = 0x03;

const TTL_RECORD_KIND: u8 = 0x00;
const TTL_FILE_KIND: u8 = 0x01;

macro_rules! hashed_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 8]);

        impl $name {
            /// Derive the id from a name
            pub fn from_name(name: &str) -> Self {
                $name(xxh3_64(name.as_bytes()).to_be_bytes())
            }

            /// Raw id bytes
            pub fn as_bytes(&self) -> &[u8; 8] {
                &self.0
            }
        }
    };
}

hashed_id!(
    /// Identifier of a collection inside the keyspace
    CollectionId
);
hashed_id!(
    /// Identifier of an index inside its collection's keyspace
    IndexId
);

/// Prefix of every collection metadata key
pub fn collection_meta_prefix() -> Vec<u8> {
    let mut key = vec![META_PREFIX];
    key.extend_from_slice(b"collection/");
    key
}

/// Key holding one collection's serialized metadata
pub fn collection_meta_key(name: &str) -> Vec<u8> {
    let mut key = collection_meta_prefix();
    key.extend_from_slice(name.as_bytes());
    key
}

/// Prefix of everything owned by a collection
pub fn collection_prefix(cid: CollectionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(COLLECTION_PREFIX);
    key.extend_from_slice(cid.as_bytes());
    key
}

fn tagged(cid: CollectionId, tag: u8) -> Vec<u8> {
    let mut key = collection_prefix(cid);
    key.push(tag);
    key
}

/// Prefix of all record payload keys of a collection
pub fn record_prefix(cid: CollectionId) -> Vec<u8> {
    tagged(cid, RECORD_TAG)
}

/// Key of one record payload
pub fn record_key(cid: CollectionId, id: &str) -> Vec<u8> {
    let mut key = record_prefix(cid);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Record id from a key produced by [`record_key`]
pub fn record_id(cid: CollectionId, key: &[u8]) -> Option<String> {
    let rest = key.strip_prefix(record_prefix(cid).as_slice())?;
    String::from_utf8(rest.to_vec()).ok()
}

/// Prefix of all entries of one index
pub fn index_prefix(cid: CollectionId, iid: IndexId) -> Vec<u8> {
    let mut key = tagged(cid, INDEX_TAG);
    key.extend_from_slice(iid.as_bytes());
    key
}

/// Key of one `(encoded value, id)` index entry
pub fn index_entry_key(prefix: &[u8], encoded: &[u8], id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + encoded.len() + id.len() + 2);
    key.extend_from_slice(prefix);
    key.extend_from_slice(encoded);
    key.extend_from_slice(id.as_bytes());
    debug_assert!(id.len() <= MAX_NAME_LEN);
    key.extend_from_slice(&(id.len() as u16).to_be_bytes());
    key
}

/// Split an index entry key back into `(encoded value, id)`
pub fn split_index_entry(prefix: &[u8], key: &[u8]) -> Option<(Vec<u8>, String)> {
    let rest = key.strip_prefix(prefix)?;
    let len_at = rest.len().checked_sub(2)?;
    let id_len = u16::from_be_bytes([rest[len_at], rest[len_at + 1]]) as usize;
    let id_at = len_at.checked_sub(id_len)?;
    let id = String::from_utf8(rest[id_at..len_at].to_vec()).ok()?;
    Some((rest[..id_at].to_vec(), id))
}

/// Prefix of a collection's full-text adapter keyspace
pub fn kv_prefix(cid: CollectionId) -> Vec<u8> {
    tagged(cid, KV_TAG)
}

/// Key of a record's TTL back-reference
pub fn ttl_ref_key(cid: CollectionId, id: &str) -> Vec<u8> {
    let mut key = tagged(cid, TTL_REF_TAG);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Prefix of all TTL back-references of a collection
pub fn ttl_ref_prefix(cid: CollectionId) -> Vec<u8> {
    tagged(cid, TTL_REF_TAG)
}

/// What a TTL entry expires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtlTarget {
    /// A record, addressed by collection name
    Record {
        /// Owning collection name
        collection: String,
        /// Record id
        id: String,
    },
    /// A stored file
    File {
        /// File id
        id: String,
    },
}

/// Time-ordered key of a TTL queue entry
pub fn ttl_key(expires_at: DateTime<Utc>, target: &TtlTarget) -> Vec<u8> {
    let mut key = vec![TTL_PREFIX];
    key.extend_from_slice(&encode_time(expires_at));
    match target {
        TtlTarget::Record { collection, id } => {
            key.push(TTL_RECORD_KIND);
            debug_assert!(collection.len() <= MAX_NAME_LEN);
    key.extend_from_slice(&(collection.len() as u16).to_be_bytes());
            key.extend_from_slice(collection.as_bytes());
            key.extend_from_slice(id.as_bytes());
        }
        TtlTarget::File { id } => {
            key.push(TTL_FILE_KIND);
            key.extend_from_slice(id.as_bytes());
        }
    }
    key
}

/// Prefix of the whole TTL queue
pub fn ttl_prefix() -> Vec<u8> {
    vec![TTL_PREFIX]
}

/// Exclusive upper bound covering every TTL entry due at or before `now`
pub fn ttl_due_bound(now: DateTime<Utc>) -> Vec<u8> {
    let mut key = vec![TTL_PREFIX];
    key.extend_from_slice(&encode_time(now));
    key.push(0xFF);
    key
}

/// Parse a key produced by [`ttl_key`]
pub fn parse_ttl_key(key: &[u8]) -> Option<(DateTime<Utc>, TtlTarget)> {
    let rest = key.strip_prefix(&[TTL_PREFIX])?;
    if rest.len() < codec::TIME_WIDTH + 1 {
        return None;
    }
    let expires_at = match codec::decode(ValueType::Time, &rest[..codec::TIME_WIDTH]).ok()? {
        Value::Time(t) => t,
        _ => return None,
    };
    let rest = &rest[codec::TIME_WIDTH..];
    let target = match rest[0] {
        TTL_RECORD_KIND => {
            let body = &rest[1..];
            if body.len() < 2 {
                return None;
            }
            let len = u16::from_be_bytes([body[0], body[1]]) as usize;
            let name = body.get(2..2 + len)?;
            let id = &body[2 + len..];
            TtlTarget::Record {
                collection: String::from_utf8(name.to_vec()).ok()?,
                id: String::from_utf8(id.to_vec()).ok()?,
            }
        }
        TTL_FILE_KIND => TtlTarget::File {
            id: String::from_utf8(rest[1..].to_vec()).ok()?,
        },
        _ => return None,
    };
    Some((expires_at, target))
}

/// Order-preserving bytes of a timestamp, as used in TTL keys
pub fn encode_time(at: DateTime<Utc>) -> Vec<u8> {
    let mut out = Vec::with_capacity(codec::TIME_WIDTH);
    out.extend_from_slice(&codec::ordered_i64_bytes(at.timestamp()));
    out.extend_from_slice(&at.timestamp_subsec_nanos().to_be_bytes());
    out
}

/// Prefix of every chunk of one file
pub fn file_prefix(file_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + file_id.len());
    key.push(FILE_PREFIX);
    debug_assert!(file_id.len() <= MAX_NAME_LEN);
    key.extend_from_slice(&(file_id.len() as u16).to_be_bytes());
    key.extend_from_slice(file_id.as_bytes());
    key
}

/// Key of chunk `index` of a file
pub fn file_chunk_key(file_id: &str, index: u32) -> Vec<u8> {
    let mut key = file_prefix(file_id);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Key of a file's TTL back-reference
pub fn file_ttl_ref_key(file_id: &str) -> Vec<u8> {
    let mut key = vec![FILE_TTL_REF_PREFIX];
    key.extend_from_slice(file_id.as_bytes());
    key
}
