//! Argument and value encoding
//!
//! [`KeyCodec`] turns call arguments into a canonical byte form and a digest.
//! [`ValueCodec`] encodes return values for the store; [`JsonCodec`] is the default.
//!
//! Canonical form: arguments are converted to a `serde_json::Value` first, so
//! map keys come out sorted no matter what map type the caller used, and the
//! value is then written as compact JSON. Non-finite floats have no JSON form
//! (serde_json would write them as `null`), so arguments holding one are
//! rejected instead of colliding with `None`.

use crate::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::ser::{self, Error as _, SerializeTuple};
use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Deterministic argument serialization used for cache keys
pub struct KeyCodec;

impl KeyCodec {
    /// Convert arguments to their canonical JSON value
    pub fn to_value<A: Serialize + ?Sized>(args: &A) -> Result<Value> {
        canonical_value(args).map_err(CacheError::UnserializableArgument)
    }

    /// Serialize arguments to canonical bytes
    pub fn serialize<A: Serialize + ?Sized>(args: &A) -> Result<Vec<u8>> {
        let value = Self::to_value(args)?;
        serde_json::to_vec(&value).map_err(|e| CacheError::UnserializableArgument(e.to_string()))
    }

    /// Hex-encoded SHA-256 of the canonical serialization
    pub fn digest<A: Serialize + ?Sized>(args: &A) -> Result<String> {
        let bytes = Self::serialize(args)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

fn canonical_value<T: Serialize + ?Sized>(value: &T) -> std::result::Result<Value, String> {
    value.serialize(FiniteFloats).map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| e.to_string())
}

#[derive(Debug)]
struct NotRepresentable(String);

impl fmt::Display for NotRepresentable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NotRepresentable {}

impl ser::Error for NotRepresentable {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

type Checked = std::result::Result<(), NotRepresentable>;

fn check_float(v: f64) -> Checked {
    if v.is_finite() {
        Ok(())
    } else {
        Err(NotRepresentable(format!("float {} has no canonical form", v)))
    }
}

/// Serializer that only walks a value, failing on non-finite floats
#[derive(Clone, Copy)]
struct FiniteFloats;

impl Serializer for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Checked {
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Checked {
        Ok(())
    }

    fn serialize_i16(self, _: i16) -> Checked {
        Ok(())
    }

    fn serialize_i32(self, _: i32) -> Checked {
        Ok(())
    }

    fn serialize_i64(self, _: i64) -> Checked {
        Ok(())
    }

    fn serialize_i128(self, _: i128) -> Checked {
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Checked {
        Ok(())
    }

    fn serialize_u16(self, _: u16) -> Checked {
        Ok(())
    }

    fn serialize_u32(self, _: u32) -> Checked {
        Ok(())
    }

    fn serialize_u64(self, _: u64) -> Checked {
        Ok(())
    }

    fn serialize_u128(self, _: u128) -> Checked {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Checked {
        check_float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Checked {
        check_float(v)
    }

    fn serialize_char(self, _: char) -> Checked {
        Ok(())
    }

    fn serialize_str(self, _: &str) -> Checked {
        Ok(())
    }

    fn serialize_bytes(self, _: &[u8]) -> Checked {
        Ok(())
    }

    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> std::result::Result<Self, NotRepresentable> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> std::result::Result<Self, NotRepresentable> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, NotRepresentable> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, NotRepresentable> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> std::result::Result<Self, NotRepresentable> {
        Ok(self)
    }

    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, NotRepresentable> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, NotRepresentable> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Checked {
        key.serialize(*self)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = NotRepresentable;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

/// Encoding of return values to and from stored bytes
pub trait ValueCodec: Send + Sync {
    /// Encode a value for storage
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a stored value. `key` is only used for error context.
    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Result<T>;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

/// JSON value codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Dynamic argument set with positional and keyword parts
///
/// Keywords are kept sorted by name, so the order they are added in does not
/// matter. Positional and keyword placement is part of the identity:
/// `arg(1)` and `kwarg("x", 1)` yield different keys.
///
/// A value that fails to serialize is remembered and reported when the
/// arguments are encoded, which is when key derivation fails with
/// [`CacheError::UnserializableArgument`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
    invalid: Option<String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize>(mut self, value: T) -> Self {
        match canonical_value(&value) {
            Ok(v) => self.positional.push(v),
            Err(e) => self.record_invalid(format!("positional #{}: {}", self.positional.len(), e)),
        }
        self
    }

    /// Set a keyword argument, replacing any earlier value for the same name
    pub fn kwarg<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Self {
        let name = name.into();
        match canonical_value(&value) {
            Ok(v) => {
                self.keyword.insert(name, v);
            }
            Err(e) => self.record_invalid(format!("keyword {:?}: {}", name, e)),
        }
        self
    }

    fn record_invalid(&mut self, reason: String) {
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// Decode the positional argument at `index`
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.positional
            .get(index)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Decode the keyword argument `name`
    pub fn get_kwarg<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.keyword
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for CallArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let Some(reason) = &self.invalid {
            return Err(S::Error::custom(reason));
        }
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.positional)?;
        tuple.serialize_element(&self.keyword)?;
        tuple.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_digest_is_deterministic() {
        let a = KeyCodec::digest(&(1, "two", 3.0)).unwrap();
        let b = KeyCodec::digest(&(1, "two", 3.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_map_order_does_not_matter() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{}", i), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{}", i), i);
        }
        assert_eq!(
            KeyCodec::serialize(&first).unwrap(),
            KeyCodec::serialize(&second).unwrap()
        );
    }

    #[test]
    fn test_non_string_map_keys_are_unserializable() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        let err = KeyCodec::digest(&map).unwrap_err();
        assert!(matches!(err, CacheError::UnserializableArgument(_)));
    }

    #[test]
    fn test_non_finite_floats_are_unserializable() {
        for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let err = KeyCodec::digest(&value).unwrap_err();
            assert!(matches!(err, CacheError::UnserializableArgument(_)));
        }
        assert!(KeyCodec::digest(&f32::INFINITY).is_err());
    }

    #[test]
    fn test_nested_non_finite_float_rejected() {
        #[derive(Serialize)]
        struct Point {
            label: String,
            coords: Vec<Option<f64>>,
        }

        let point = Point {
            label: "p".to_string(),
            coords: vec![Some(1.0), Some(f64::NEG_INFINITY)],
        };
        assert!(matches!(
            KeyCodec::digest(&point),
            Err(CacheError::UnserializableArgument(_))
        ));

        let mut by_name = HashMap::new();
        by_name.insert("x".to_string(), f64::NAN);
        assert!(KeyCodec::digest(&(1, by_name)).is_err());
    }

    #[test]
    fn test_infinity_does_not_collide_with_none() {
        let none = KeyCodec::digest(&Option::<f64>::None).unwrap();
        assert_ne!(KeyCodec::digest(&0.0f64).unwrap(), none);
        assert!(KeyCodec::digest(&Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_call_args_non_finite_float() {
        let args = CallArgs::new().arg(1.5).kwarg("scale", f64::INFINITY);
        let err = KeyCodec::digest(&args).unwrap_err();
        assert!(matches!(err, CacheError::UnserializableArgument(ref m) if m.contains("scale")));
    }

    #[test]
    fn test_distinct_arguments_distinct_digests() {
        let a = KeyCodec::digest(&vec![2, 3]).unwrap();
        let b = KeyCodec::digest(&vec![4, 5, 6]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_call_args_keyword_order_normalized() {
        let a = CallArgs::new().arg(1).kwarg("limit", 10).kwarg("offset", 5);
        let b = CallArgs::new().arg(1).kwarg("offset", 5).kwarg("limit", 10);
        assert_eq!(KeyCodec::digest(&a).unwrap(), KeyCodec::digest(&b).unwrap());
    }

    #[test]
    fn test_call_args_positional_differs_from_keyword() {
        let positional = CallArgs::new().arg(1);
        let keyword = CallArgs::new().kwarg("x", 1);
        assert_ne!(
            KeyCodec::digest(&positional).unwrap(),
            KeyCodec::digest(&keyword).unwrap()
        );
    }

    #[test]
    fn test_call_args_invalid_value_surfaces_on_encode() {
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1);
        let args = CallArgs::new().arg("ok").kwarg("bad", bad);
        let err = KeyCodec::serialize(&args).unwrap_err();
        assert!(matches!(err, CacheError::UnserializableArgument(ref m) if m.contains("bad")));
    }

    #[test]
    fn test_call_args_accessors() {
        let args = CallArgs::new().arg(42).arg("name").kwarg("verbose", true);
        assert_eq!(args.len(), 3);
        assert_eq!(args.get::<i32>(0), Some(42));
        assert_eq!(args.get::<String>(1), Some("name".to_string()));
        assert_eq!(args.get_kwarg::<bool>("verbose"), Some(true));
        assert_eq!(args.get::<i32>(5), None);
    }

    #[test]
    fn test_json_codec_keeps_none_distinct_from_absence() {
        let codec = JsonCodec;
        let bytes = codec.encode(&Option::<u32>::None).unwrap();
        assert!(!bytes.is_empty());
        let decoded: Option<u32> = codec.decode("k", &bytes).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn test_json_codec_decode_mismatch() {
        let codec = JsonCodec;
        let bytes = codec.encode(&"text").unwrap();
        let err = codec.decode::<u64>("some:key", &bytes).unwrap_err();
        assert!(matches!(err, CacheError::Decode { ref key, .. } if key == "some:key"));
    }
}
