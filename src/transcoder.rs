//! Transcoders: typed values ↔ cache frames.

use crate::error::{Error, Result};
use crate::types::CacheItem;
use bytes::Bytes;
use serde::de::value::U8Deserializer;
use serde::de::{DeserializeOwned, DeserializeSeed, SeqAccess, Visitor};
use serde::ser::Impossible;
use serde::Serialize;
use std::fmt;

/// Type flag marking a bincode-serialized payload.
pub const FLAG_BINCODE: u32 = 0x0001;

/// Type flag (none at all) marking an untranscoded byte payload.
pub const FLAG_RAW: u32 = 0x0000;

/// Serializes values into cache frames (`data` + type flags) and back.
pub trait Transcoder: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<CacheItem>;

    fn decode<T: DeserializeOwned>(&self, item: &CacheItem) -> Result<T>;
}

/// Default transcoder: bincode-encoded payloads tagged with
/// [`FLAG_BINCODE`]. Frames with other flags are refused rather than
/// misread.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeTranscoder;

impl Transcoder for BincodeTranscoder {
    fn encode<T: Serialize>(&self, value: &T) -> Result<CacheItem> {
        let data = bincode::serialize(value)?;
        Ok(CacheItem::new(FLAG_BINCODE, Bytes::from(data)))
    }

    fn decode<T: DeserializeOwned>(&self, item: &CacheItem) -> Result<T> {
        if item.flags != FLAG_BINCODE {
            return Err(Error::Serialization(format!(
                "unexpected type flags 0x{:08x}",
                item.flags
            )));
        }
        Ok(bincode::deserialize(&item.data)?)
    }
}

/// Passthrough transcoder: the frame holds the value's exact bytes,
/// tagged [`FLAG_RAW`], wire-compatible with clients that store plain
/// byte payloads.
///
/// Only string- and byte-shaped values (`String`, `&str`, `Vec<u8>`,
/// byte slices) can pass through; anything with more structure is
/// refused rather than guessed at. Frames carrying other type flags
/// are refused on decode, like [`BincodeTranscoder`] does.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTranscoder;

impl Transcoder for RawTranscoder {
    fn encode<T: Serialize>(&self, value: &T) -> Result<CacheItem> {
        let mut data = Vec::new();
        value
            .serialize(RawSerializer { out: &mut data })
            .map_err(|e| Error::Serialization(e.0))?;
        Ok(CacheItem::new(FLAG_RAW, Bytes::from(data)))
    }

    fn decode<T: DeserializeOwned>(&self, item: &CacheItem) -> Result<T> {
        if item.flags != FLAG_RAW {
            return Err(Error::Serialization(format!(
                "unexpected type flags 0x{:08x}",
                item.flags
            )));
        }
        T::deserialize(RawDeserializer { data: &item.data }).map_err(|e| Error::Serialization(e.0))
    }
}

/// Error type for the raw byte format.
#[derive(Debug)]
struct RawCodecError(String);

impl fmt::Display for RawCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RawCodecError {}

impl serde::ser::Error for RawCodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

impl serde::de::Error for RawCodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

fn unsupported(what: &str) -> RawCodecError {
    RawCodecError(format!("raw transcoder cannot carry {what}"))
}

/// Byte-only serializer backing [`RawTranscoder`].
struct RawSerializer<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> serde::Serializer for RawSerializer<'a> {
    type Ok = ();
    type Error = RawCodecError;
    type SerializeSeq = RawSeqSerializer<'a>;
    type SerializeTuple = Impossible<(), RawCodecError>;
    type SerializeTupleStruct = Impossible<(), RawCodecError>;
    type SerializeTupleVariant = Impossible<(), RawCodecError>;
    type SerializeMap = Impossible<(), RawCodecError>;
    type SerializeStruct = Impossible<(), RawCodecError>;
    type SerializeStructVariant = Impossible<(), RawCodecError>;

    fn serialize_str(self, v: &str) -> std::result::Result<(), RawCodecError> {
        self.out.extend_from_slice(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> std::result::Result<(), RawCodecError> {
        self.out.extend_from_slice(v);
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> std::result::Result<(), RawCodecError> {
        self.out.push(v);
        Ok(())
    }

    fn serialize_char(self, v: char) -> std::result::Result<(), RawCodecError> {
        let mut buf = [0u8; 4];
        self.out.extend_from_slice(v.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }

    fn serialize_seq(
        self,
        _len: Option<usize>,
    ) -> std::result::Result<Self::SerializeSeq, RawCodecError> {
        Ok(RawSeqSerializer { out: self.out })
    }

    fn serialize_some<T: ?Sized + Serialize>(
        self,
        value: &T,
    ) -> std::result::Result<(), RawCodecError> {
        value.serialize(self)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> std::result::Result<(), RawCodecError> {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("bool"))
    }

    fn serialize_i8(self, _v: i8) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("i8"))
    }

    fn serialize_i16(self, _v: i16) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("i16"))
    }

    fn serialize_i32(self, _v: i32) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("i32"))
    }

    fn serialize_i64(self, _v: i64) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("i64"))
    }

    fn serialize_u16(self, _v: u16) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("u16"))
    }

    fn serialize_u32(self, _v: u32) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("u32"))
    }

    fn serialize_u64(self, _v: u64) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("u64"))
    }

    fn serialize_f32(self, _v: f32) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("f32"))
    }

    fn serialize_f64(self, _v: f64) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("f64"))
    }

    fn serialize_none(self) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("None"))
    }

    fn serialize_unit(self) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("unit"))
    }

    fn serialize_unit_struct(
        self,
        _name: &'static str,
    ) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("unit struct"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("enum"))
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> std::result::Result<(), RawCodecError> {
        Err(unsupported("enum"))
    }

    fn serialize_tuple(
        self,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTuple, RawCodecError> {
        Err(unsupported("tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleStruct, RawCodecError> {
        Err(unsupported("tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleVariant, RawCodecError> {
        Err(unsupported("enum"))
    }

    fn serialize_map(
        self,
        _len: Option<usize>,
    ) -> std::result::Result<Self::SerializeMap, RawCodecError> {
        Err(unsupported("map"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStruct, RawCodecError> {
        Err(unsupported("struct"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStructVariant, RawCodecError> {
        Err(unsupported("enum"))
    }
}

/// Sequence serializer: each element must itself be byte-shaped, so
/// `Vec<u8>` writes its exact bytes.
struct RawSeqSerializer<'a> {
    out: &'a mut Vec<u8>,
}

impl serde::ser::SerializeSeq for RawSeqSerializer<'_> {
    type Ok = ();
    type Error = RawCodecError;

    fn serialize_element<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), RawCodecError> {
        value.serialize(RawSerializer { out: &mut *self.out })
    }

    fn end(self) -> std::result::Result<(), RawCodecError> {
        Ok(())
    }
}

/// Byte-only deserializer backing [`RawTranscoder`].
struct RawDeserializer<'de> {
    data: &'de [u8],
}

impl<'de> serde::Deserializer<'de> for RawDeserializer<'de> {
    type Error = RawCodecError;

    fn deserialize_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, RawCodecError> {
        visitor.visit_bytes(self.data)
    }

    fn deserialize_str<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, RawCodecError> {
        let text = std::str::from_utf8(self.data)
            .map_err(|_| RawCodecError("payload is not UTF-8".to_string()))?;
        visitor.visit_str(text)
    }

    fn deserialize_string<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, RawCodecError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, RawCodecError> {
        visitor.visit_bytes(self.data)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, RawCodecError> {
        visitor.visit_byte_buf(self.data.to_vec())
    }

    fn deserialize_seq<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, RawCodecError> {
        visitor.visit_seq(RawSeqAccess {
            iter: self.data.iter(),
        })
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char option
        unit unit_struct newtype_struct tuple tuple_struct map struct enum
        identifier ignored_any
    }
}

struct RawSeqAccess<'de> {
    iter: std::slice::Iter<'de, u8>,
}

impl<'de> SeqAccess<'de> for RawSeqAccess<'de> {
    type Error = RawCodecError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> std::result::Result<Option<T::Value>, RawCodecError> {
        match self.iter.next() {
            Some(&byte) => seed.deserialize(U8Deserializer::new(byte)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}
