//! JSON field reader.
//!
//! Objects are consumed field by field: each known key is removed as it is
//! decoded with serde, and whatever is left at the end is an unknown key.
//! Integers are accepted as JSON numbers or decimal strings and always
//! written back as strings, since node counts and primes outgrow a double.

use std::fmt::Display;
use std::str::FromStr;

use carma_types::{Psn, PsnSet};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::phonebook::Phonebook;
use crate::{Result, TopologyError};

/// A JSON object being parsed.
pub(crate) struct Fields {
    obj: Map<String, Value>,
}

impl Fields {
    pub(crate) fn new(value: Value) -> Result<Self> {
        match value {
            Value::Object(obj) => Ok(Self { obj }),
            other => Err(TopologyError::parse("", format!("expected an object, got {}", kind(&other)))),
        }
    }

    pub(crate) fn take_raw(&mut self, key: &str) -> Option<Value> {
        self.obj.remove(key)
    }

    pub(crate) fn optional<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.obj.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| TopologyError::parse(key, e)),
        }
    }

    pub(crate) fn required<T: DeserializeOwned>(&mut self, key: &str) -> Result<T> {
        self.optional(key)?
            .ok_or_else(|| TopologyError::parse(key, "missing required key"))
    }

    pub(crate) fn or<T: DeserializeOwned>(&mut self, key: &str, default: T) -> Result<T> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    /// Like [`Fields::optional`] for a PSN set, additionally requiring every
    /// member to be in the phonebook.
    pub(crate) fn known_set(&mut self, key: &str, phonebook: &Phonebook) -> Result<Option<PsnSet>> {
        let Some(set) = self.optional::<PsnSet>(key)? else {
            return Ok(None);
        };
        for psn in &set {
            phonebook.require(psn).map_err(|e| e.within(key))?;
        }
        Ok(Some(set))
    }

    /// Reject any key nobody consumed.
    pub(crate) fn finish(self) -> Result<()> {
        match self.obj.keys().next() {
            Some(key) => Err(TopologyError::parse(key.as_str(), "unknown key")),
            None => Ok(()),
        }
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode a number written either as a JSON number or as a string.
pub(crate) fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(serde_json::Number),
        Text(String),
    }

    let text = match Repr::deserialize(deserializer)? {
        Repr::Number(n) => n.to_string(),
        Repr::Text(s) => s,
    };
    text.parse()
        .map_err(|_| de::Error::custom(format!("invalid value: {text:?}")))
}

/// A numeric field, see [`number_or_string`].
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(transparent, bound(deserialize = "T: FromStr"))]
pub(crate) struct Num<T>(#[serde(deserialize_with = "number_or_string")] pub T);

/// Hex-encoded byte string.
pub(crate) struct Hex(pub Vec<u8>);

impl<'de> Deserialize<'de> for Hex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text)
            .map(Hex)
            .map_err(|e| de::Error::custom(format!("invalid hex: {e}")))
    }
}

pub(crate) fn int_value(n: impl Display) -> Value {
    Value::String(n.to_string())
}

pub(crate) fn hex_value(bytes: &[u8]) -> Value {
    Value::String(hex::encode(bytes))
}

pub(crate) fn psns_value<'a>(psns: impl IntoIterator<Item = &'a Psn>) -> Value {
    Value::Array(psns.into_iter().map(|p| Value::String(p.to_slug())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carma_types::Role;
    use num_bigint::BigUint;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_integers_from_strings_and_numbers() {
        let mut f = Fields::new(json!({"a": "12", "b": 7, "c": "x", "p": "340282366920938463463374607431768211297"}))
            .expect("object");
        assert_eq!(f.required::<Num<u32>>("a").expect("a"), Num(12));
        assert_eq!(f.required::<Num<u32>>("b").expect("b"), Num(7));
        let err = f.required::<Num<u32>>("c").expect_err("c is not a number");
        assert_eq!(err.to_string(), "c: invalid value: \"x\"");
        let Num(prime) = f.required::<Num<BigUint>>("p").expect("big");
        assert_eq!(prime.bits(), 128);
        f.finish().expect("all consumed");
    }

    #[test]
    fn test_rates_accept_negative_defaults() {
        let mut f = Fields::new(json!({"r": -1, "s": "0.25"})).expect("object");
        assert_eq!(f.required::<Num<f64>>("r").expect("r"), Num(-1.0));
        assert_eq!(f.required::<Num<f64>>("s").expect("s"), Num(0.25));
    }

    #[test]
    fn test_missing_and_unknown_keys() {
        let mut f = Fields::new(json!({"extra": 1})).expect("object");
        let err = f.required::<bool>("flag").expect_err("missing");
        assert_eq!(err.to_string(), "flag: missing required key");
        assert!(f.or("flag", true).expect("default"));
        let err = f.finish().expect_err("extra is unknown");
        assert_eq!(err.to_string(), "extra: unknown key");
    }

    #[test]
    fn test_psn_collections_use_slugs() {
        let mut f = Fields::new(json!({"s": ["%41", "b", "b"], "m": {"3": ["a"]}})).expect("object");
        let set: PsnSet = f.required("s").expect("set");
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Psn::new("A")));
        let map: BTreeMap<u32, Vec<Psn>> = f.required("m").expect("map");
        assert_eq!(map[&3], vec![Psn::new("a")]);
    }

    #[test]
    fn test_roles_and_hex_decode_through_serde() {
        let mut f = Fields::new(json!({"role": "mc_leader", "bad": "lead", "k": "00ff", "z": "0g"})).expect("object");
        assert_eq!(f.required::<Role>("role").expect("role"), Role::McLeader);
        assert!(f.required::<Role>("bad").is_err());
        let Hex(bytes) = f.required("k").expect("hex");
        assert_eq!(bytes, [0x00, 0xff]);
        let err = f.required::<Hex>("z").map(|_| ()).expect_err("not hex");
        assert!(err.to_string().starts_with("z: invalid hex"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Fields::new(json!([1, 2])).is_err());
    }
}
