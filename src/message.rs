use std::fmt;

use chrono::{DateTime, Utc};
use serde::{ser, Serialize};
use serde_json::{Map, Value};

use crate::{
    flatten::{self, flatten},
    Error,
};

/// GELF format version stamped into every message.
const VERSION: &str = "1.1";

/// Flattened keys that would shadow a metadata field get an extra
/// leading underscore so the real field is never overwritten.
const RESERVED: &[&str] = &[
    "version",
    "host",
    "short_message",
    "timestamp",
    "full_message",
    "level",
    "message",
];

/**
Configuration for message construction.
*/
#[derive(Debug, Default, Clone)]
pub struct Config {
    /**
    The default `host` field for every message built from this
    configuration.

    Resolved once at process start; an empty string is carried as-is
    when no hostname is available.
    */
    pub host: String,
}

/**
Build a message factory from configuration.
*/
pub fn build(config: crate::Config) -> Messages {
    Messages::new(config)
}

/**
A factory for messages sharing one resolved hostname and one
flattening configuration.
*/
#[derive(Debug, Clone)]
pub struct Messages {
    host: String,
    flatten: flatten::Config,
}

impl Messages {
    pub fn new(config: crate::Config) -> Self {
        Messages {
            host: config.message.host,
            flatten: config.flatten,
        }
    }

    /// Construct a message with the factory's hostname and the
    /// current UTC time.
    pub fn message(&self, short_message: impl Into<String>) -> Message {
        Message {
            host: self.host.clone(),
            short_message: short_message.into(),
            full_message: String::new(),
            level: 0,
            timestamp: Utc::now(),
            data: None,
            fields: Vec::new(),
            flatten: self.flatten.clone(),
        }
    }
}

/**
GELF metadata and a structured payload for a single log event.

The message is assembled lazily: setters only record state, and
[`Message::to_gelf`] produces the encoded bytes without mutating
anything, so it can be called repeatedly with the same result.
*/
#[derive(Debug)]
pub struct Message {
    host: String,
    short_message: String,
    full_message: String,
    level: i32,
    timestamp: DateTime<Utc>,
    data: Option<Payload>,
    fields: Vec<(String, Value)>,
    flatten: flatten::Config,
}

#[derive(Debug)]
enum Payload {
    Value(Value),
    // A payload that failed serde normalization; reported when the
    // message is encoded, not when it is set.
    Invalid(String),
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: &'static str,
    host: &'a str,
    short_message: &'a str,
    timestamp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    full_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<i32>,

    // Underscore-prefixed user fields
    #[serde(flatten)]
    additional: Map<String, Value>,
}

impl Message {
    /// Construct a message with default configuration (empty hostname).
    pub fn new(short_message: impl Into<String>) -> Self {
        build(crate::Config::default()).message(short_message)
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    /// An empty full message is treated as absent.
    pub fn set_full_message(&mut self, full_message: impl Into<String>) {
        self.full_message = full_message.into();
    }

    /// A level of zero or below is treated as absent.
    pub fn set_level(&mut self, level: i32) {
        self.level = level;
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
    }

    /**
    Replace the payload with any serializable value.

    The value is normalized through serde immediately, so named-field
    structs behave like keyed maps (honoring renames and skipped
    fields) and references are serialized through. A value that fails
    normalization is kept and reported by [`Message::to_gelf`].
    */
    pub fn set_data(&mut self, data: impl Serialize) {
        // serde_json encodes non-finite floats as null instead of
        // failing, which would silently drop them from the output
        let payload = match data.serialize(FiniteCheck) {
            Ok(()) => match serde_json::to_value(data) {
                Ok(value) => Payload::Value(value),
                Err(err) => Payload::Invalid(err.to_string()),
            },
            Err(err) => Payload::Invalid(err.to_string()),
        };

        self.data = Some(payload);
    }

    /// Replace the payload with a value parsed from JSON text.
    pub fn set_json(&mut self, json: &[u8]) -> Result<(), Error> {
        let value = serde_json::from_slice(json).map_err(Error::Parse)?;
        self.data = Some(Payload::Value(value));
        Ok(())
    }

    /**
    Append an explicit field, stored as `_key` in the encoded message.

    Explicit fields are applied after the flattened payload and in call
    order, so they overwrite equally-named payload fields and later
    calls with the same key win.
    */
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((key.into(), value.into()));
    }

    /**
    Assemble and serialize the message as a single flat JSON object.

    The payload is flattened, merged with the metadata fields and the
    explicit fields, and encoded as UTF-8 JSON with no NUL bytes.
    */
    pub fn to_gelf(&self) -> Result<Vec<u8>, Error> {
        let mut additional = Map::new();

        if let Some(payload) = &self.data {
            let value = match payload {
                Payload::Value(value) => value,
                Payload::Invalid(msg) => return Err(Error::Encode(msg.clone())),
            };

            for (key, value) in flatten(value, "", 0, &self.flatten) {
                additional.insert(external_key(&key), value);
            }
        }

        for (key, value) in &self.fields {
            additional.insert(format!("_{}", key), value.clone());
        }

        let envelope = Envelope {
            version: VERSION,
            host: &self.host,
            short_message: &self.short_message,
            timestamp: self.timestamp.timestamp(),
            full_message: if self.full_message.is_empty() {
                None
            } else {
                Some(&self.full_message)
            },
            level: if self.level > 0 {
                Some(self.level)
            } else {
                None
            },
            additional,
        };

        serde_json::to_vec(&envelope).map_err(|err| Error::Encode(err.to_string()))
    }
}

/// Map a flattened key to its external `_`-prefixed form.
fn external_key(key: &str) -> String {
    if key.is_empty() {
        // A scalar payload is the entire value, not a sub-field
        "_value".to_owned()
    } else if RESERVED.contains(&key) {
        format!("__{}", key)
    } else {
        format!("_{}", key)
    }
}

/**
A serializer that produces no output and only fails on values JSON
cannot represent.

Payloads are walked with this before serde normalization: NaN and
infinite floats have no JSON representation, and once normalized they
become nulls that can no longer be told apart from real ones.
*/
struct FiniteCheck;

#[derive(Debug)]
struct CheckError(String);

impl CheckError {
    fn non_finite() -> Self {
        CheckError("non-finite float in payload".to_owned())
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for CheckError {}

impl ser::Error for CheckError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        CheckError(msg.to_string())
    }
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_f32(self, v: f32) -> Result<(), CheckError> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(CheckError::non_finite())
        }
    }

    fn serialize_f64(self, v: f64) -> Result<(), CheckError> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(CheckError::non_finite())
        }
    }

    fn serialize_bool(self, _: bool) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_i16(self, _: i16) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_i32(self, _: i32) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_i64(self, _: i64) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_u16(self, _: u16) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_u32(self, _: u32) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_u64(self, _: u64) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_char(self, _: char) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_str(self, _: &str) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_bytes(self, _: &[u8]) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_none(self) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_unit(self) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
    ) -> Result<(), CheckError> {
        Ok(())
    }

    fn serialize_some<T>(self, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_struct<T>(self, _: &'static str, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, CheckError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, CheckError> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        key.serialize(FiniteCheck)
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T>(&mut self, _: &'static str, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CheckError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = CheckError;

    fn serialize_field<T>(&mut self, _: &'static str, value: &T) -> Result<(), CheckError>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CheckError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use serde_json::json;

    fn to_map(data: impl Serialize) -> Map<String, Value> {
        let mut msg = Message::new("test");
        msg.set_data(data);

        let raw = msg.to_gelf().expect("failed to encode GELF");

        serde_json::from_slice(&raw).expect("encoded GELF should be valid JSON")
    }

    #[test]
    fn metadata_fields_are_always_present() {
        let msg = Message::new("five");
        let raw = msg.to_gelf().expect("failed to encode GELF");
        let v: Value = serde_json::from_slice(&raw).expect("invalid JSON");

        assert_eq!(json!("1.1"), v["version"]);
        assert_eq!(json!(""), v["host"]);
        assert_eq!(json!("five"), v["short_message"]);
        assert!(v["timestamp"].is_i64());
    }

    #[test]
    fn full_message_and_level_are_optional() {
        let msg = Message::new("five");
        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert!(v.get("full_message").is_none());
        assert!(v.get("level").is_none());

        let mut msg = Message::new("five");
        msg.set_full_message("a longer account of what happened");
        msg.set_level(3);

        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert_eq!(json!("a longer account of what happened"), v["full_message"]);
        assert_eq!(json!(3), v["level"]);
    }

    #[test]
    fn timestamp_is_whole_epoch_seconds() {
        let mut msg = Message::new("five");
        msg.set_timestamp(Utc.timestamp_opt(1385053862, 307_200_000).unwrap());

        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert_eq!(json!(1385053862), v["timestamp"]);
    }

    #[test]
    fn map_payload() {
        let data = json!({
            "k1": "v1",
            "k2": { "k3": "v3" },
            "k4": [1, 2, 3],
        });

        let mut msg = Message::new("five");
        msg.set_data(data);

        let raw = msg.to_gelf().expect("failed to encode GELF");
        assert_ne!(0, raw.len());
        assert!(!raw.contains(&0));

        let v: Value = serde_json::from_slice(&raw).expect("invalid JSON");

        assert_eq!(json!("five"), v["short_message"]);
        assert_eq!(json!("v1"), v["_k1"]);
        assert_eq!(json!("v3"), v["_k2_k3"]);
        assert_eq!(json!("[1,2,3]"), v["_k4"]);
    }

    #[test]
    fn integer_payload_becomes_value_field() {
        let v = to_map(10);

        assert_eq!(json!(10), v["_value"]);
    }

    #[test]
    fn float_payload_becomes_value_field() {
        let v = to_map(3.14);

        assert_eq!(json!(3.14), v["_value"]);
    }

    #[test]
    fn boolean_payload_is_coerced_to_integer() {
        let v = to_map(true);

        assert_eq!(json!(1), v["_value"]);
    }

    #[test]
    fn struct_payload() {
        #[derive(Serialize)]
        struct Sample {
            #[serde(rename = "str")]
            s: String,
            integer: i32,
            #[serde(rename = "NoTag")]
            no_tag: String,
            #[serde(skip)]
            #[allow(dead_code)]
            hidden: String,
        }

        let sample = Sample {
            s: "blue".to_owned(),
            integer: 5,
            no_tag: "no_name".to_owned(),
            hidden: "omg".to_owned(),
        };

        let v = to_map(&sample);

        assert_eq!(json!("blue"), v["_str"]);
        assert_eq!(json!(5), v["_integer"]);
        assert_eq!(json!("no_name"), v["_NoTag"]);
        assert!(v.get("_hidden").is_none());
    }

    #[test]
    fn reference_payload_behaves_like_its_pointee() {
        #[derive(Serialize)]
        struct Sample {
            color: String,
        }

        let sample = Sample {
            color: "blue".to_owned(),
        };

        let v = to_map(&&sample);

        assert_eq!(json!("blue"), v["_color"]);
    }

    #[test]
    fn set_json_parses_the_payload() {
        let mut msg = Message::new("test");
        msg.set_json(br#"{"k1": "blue", "k2": 5}"#)
            .expect("failed to parse payload");

        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert_eq!(json!("blue"), v["_k1"]);
        assert_eq!(json!(5), v["_k2"]);
    }

    #[test]
    fn set_json_rejects_invalid_payloads() {
        let mut msg = Message::new("test");
        let err = msg
            .set_json(b"this is definitely not json")
            .expect_err("expected parsing to fail");

        match err {
            Error::Parse(_) => (),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn added_fields_overwrite_the_payload() {
        let data = json!({
            "color": "red",
            "count": "four",
        });

        let mut msg = Message::new("five");
        msg.set_data(data);
        msg.add_field("color", "orange");
        msg.add_field("color2", "blue");

        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert_eq!(json!("five"), v["short_message"]);

        // Overwrites the existing key
        assert_eq!(json!("orange"), v["_color"]);
        // Adds a new key
        assert_eq!(json!("blue"), v["_color2"]);
        // Unrelated keys are untouched
        assert_eq!(json!("four"), v["_count"]);
    }

    #[test]
    fn later_added_fields_win() {
        let mut msg = Message::new("five");
        msg.add_field("color", "orange");
        msg.add_field("color", "green");

        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert_eq!(json!("green"), v["_color"]);
    }

    #[test]
    fn reserved_names_get_an_extra_underscore() {
        let mut msg = Message::new("five");
        msg.set_data(json!({ "timestamp": 12345 }));

        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert!(v.get("_timestamp").is_none());
        assert_eq!(json!(12345), v["__timestamp"]);

        // The real metadata field is untouched
        assert!(v["timestamp"].is_i64());
        assert_ne!(json!(12345), v["timestamp"]);
    }

    #[test]
    fn deeply_nested_payloads_escape_at_the_limit() {
        let v = to_map(json!({
            "d1": { "d2": { "d3": { "d4": { "d5": "five" } } } },
        }));

        assert!(v.get("_d1_d2_d3_d4").is_none());

        let escaped = v["_d1_d2_d3"].as_str().expect("expected a string");
        assert!(escaped.contains("five"));
    }

    #[test]
    fn non_finite_scalar_payloads_fail_at_encode_time() {
        let mut msg = Message::new("five");
        msg.set_data(f64::NAN);

        let err = msg.to_gelf().expect_err("expected encoding to fail");
        match err {
            Error::Encode(reason) => assert!(reason.contains("non-finite")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn non_finite_struct_fields_fail_at_encode_time() {
        #[derive(Serialize)]
        struct Sample {
            ratio: f64,
        }

        let mut msg = Message::new("five");
        msg.set_data(Sample {
            ratio: f64::INFINITY,
        });

        let err = msg.to_gelf().expect_err("expected encoding to fail");
        match err {
            Error::Encode(_) => (),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn non_finite_array_elements_fail_at_encode_time() {
        let mut msg = Message::new("five");
        msg.set_data(vec![1.0, f64::NEG_INFINITY]);

        let err = msg.to_gelf().expect_err("expected encoding to fail");
        match err {
            Error::Encode(_) => (),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn finite_floats_still_encode() {
        let v = to_map(json!({ "ratio": 0.5 }));

        assert_eq!(json!(0.5), v["_ratio"]);
    }

    #[test]
    fn unrepresentable_payloads_fail_at_encode_time() {
        let mut data = std::collections::HashMap::new();
        data.insert((1, 2), 3);

        let mut msg = Message::new("five");
        msg.set_data(data);

        let err = msg.to_gelf().expect_err("expected encoding to fail");
        match err {
            Error::Encode(_) => (),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn encoding_is_repeatable() {
        let mut msg = Message::new("five");
        msg.set_data(json!({ "k1": "v1" }));

        let first = msg.to_gelf().expect("failed to encode GELF");
        let second = msg.to_gelf().expect("failed to encode GELF");

        assert_eq!(first, second);
    }

    #[test]
    fn factory_applies_configuration() {
        let mut config = crate::Config::default();
        config.message.host = "example.org".to_owned();
        config.flatten.max_depth = 1;

        let messages = build(config);
        let mut msg = messages.message("five");
        msg.set_data(json!({ "outer": { "inner": 1 } }));

        let v: Value =
            serde_json::from_slice(&msg.to_gelf().expect("failed to encode GELF")).expect("invalid JSON");

        assert_eq!(json!("example.org"), v["host"]);
        assert_eq!(json!("{\"inner\":1}"), v["_outer"]);
    }
}
