//! Store and manipulate messages read from the cluster.

use std::fmt;
use std::str;

/// A single message fetched from a partition.
///
/// Messages are immutable: they are produced by consumers and handed to the
/// caller, which can borrow the key and payload without copying.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Message {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a new message.
    pub fn new(
        topic: String,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        payload: Vec<u8>,
    ) -> Message {
        Message {
            topic,
            partition,
            offset,
            key,
            payload,
        }
    }

    /// Returns the topic the message was fetched from.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the partition the message was fetched from.
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Returns the offset of the message within its partition.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Returns the key of the message, or `None` if there is no key.
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Returns the payload of the message.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns a typed view of the payload.
    pub fn payload_view<V: ?Sized + FromBytes>(&self) -> Result<&V, V::Error> {
        V::from_bytes(&self.payload)
    }

    /// Returns a typed view of the key, if present.
    pub fn key_view<K: ?Sized + FromBytes>(&self) -> Option<Result<&K, K::Error>> {
        self.key().map(K::from_bytes)
    }

    /// Approximate wire size of the message, used for fetch accounting.
    pub fn size(&self) -> usize {
        self.payload.len() + self.key.as_ref().map_or(0, |k| k.len())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Message {{ topic: {:?}, partition: {}, offset: {}, key: {} bytes, payload: {} bytes }}",
            self.topic,
            self.partition,
            self.offset,
            self.key.as_ref().map_or(0, |k| k.len()),
            self.payload.len()
        )
    }
}

/// Given a reference to a byte array, returns a different view of the same
/// data. No copy of the data should be performed.
pub trait FromBytes {
    /// The error type returned when the conversion fails.
    type Error;
    /// Tries to convert the provided byte slice into a different type.
    fn from_bytes(_: &[u8]) -> Result<&Self, Self::Error>;
}

impl FromBytes for [u8] {
    type Error = ();
    fn from_bytes(bytes: &[u8]) -> Result<&Self, Self::Error> {
        Ok(bytes)
    }
}

impl FromBytes for str {
    type Error = str::Utf8Error;
    fn from_bytes(bytes: &[u8]) -> Result<&Self, Self::Error> {
        str::from_utf8(bytes)
    }
}
