//! Deserializers for the schema-flex wire format.
//!
//! Game servers disagree about whether numeric and boolean fields are
//! emitted as JSON natives or as strings (`"damage": 35` vs
//! `"damage": "35"`), sometimes across events in the same match. Every
//! helper here accepts both forms for the same field. An empty string is
//! treated as an absent value and an unparsable string decodes to the zero
//! value instead of failing the whole event.

use serde::Deserializer;
use serde::de::{self, Visitor};
use std::fmt;

struct F64Flex;

impl<'de> Visitor<'de> for F64Flex {
    type Value = f64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number or a string containing a number")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
        Ok(v.trim().parse().unwrap_or(0.0))
    }

    fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
        Ok(0.0)
    }
}

pub fn f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    deserializer.deserialize_any(F64Flex)
}

struct I64Flex;

impl<'de> Visitor<'de> for I64Flex {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an integer or a string containing an integer")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        Ok(v as i64)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
        Ok(v as i64)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        let v = v.trim();
        // Some servers stringify integers through a float formatter ("35.0")
        Ok(v.parse::<i64>()
            .unwrap_or_else(|_| v.parse::<f64>().map(|f| f as i64).unwrap_or(0)))
    }

    fn visit_unit<E: de::Error>(self) -> Result<i64, E> {
        Ok(0)
    }
}

pub fn i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    deserializer.deserialize_any(I64Flex)
}

pub fn i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    i64(deserializer).map(|v| v as i32)
}

struct BoolFlex;

impl<'de> Visitor<'de> for BoolFlex {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a boolean or a string containing a boolean")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
        Ok(v != 0)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
        Ok(v != 0)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<bool, E> {
        Ok(v != 0.0)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
        Ok(matches!(v.trim(), "true" | "True" | "TRUE" | "1" | "yes"))
    }

    fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
        Ok(false)
    }
}

pub fn bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    deserializer.deserialize_any(BoolFlex)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Mixed {
        #[serde(default, deserialize_with = "super::f64")]
        float: f64,
        #[serde(default, deserialize_with = "super::i32")]
        int: i32,
        #[serde(default, deserialize_with = "super::bool")]
        flag: bool,
    }

    #[test]
    fn accepts_native_forms() {
        let m: Mixed = serde_json::from_str(r#"{"float": 3.5, "int": 42, "flag": true}"#).unwrap();
        assert_eq!(m.float, 3.5);
        assert_eq!(m.int, 42);
        assert!(m.flag);
    }

    #[test]
    fn accepts_quoted_forms() {
        let m: Mixed =
            serde_json::from_str(r#"{"float": "3.5", "int": "42", "flag": "1"}"#).unwrap();
        assert_eq!(m.float, 3.5);
        assert_eq!(m.int, 42);
        assert!(m.flag);
    }

    #[test]
    fn int_through_float_formatter() {
        let m: Mixed = serde_json::from_str(r#"{"int": "42.0"}"#).unwrap();
        assert_eq!(m.int, 42);
    }

    #[test]
    fn empty_string_is_absent() {
        let m: Mixed =
            serde_json::from_str(r#"{"float": "", "int": "", "flag": ""}"#).unwrap();
        assert_eq!(m.float, 0.0);
        assert_eq!(m.int, 0);
        assert!(!m.flag);
    }

    #[test]
    fn garbage_string_is_zero() {
        let m: Mixed = serde_json::from_str(r#"{"float": "banana", "int": "banana"}"#).unwrap();
        assert_eq!(m.float, 0.0);
        assert_eq!(m.int, 0);
    }

    #[test]
    fn null_is_zero() {
        let m: Mixed = serde_json::from_str(r#"{"float": null, "int": null}"#).unwrap();
        assert_eq!(m.float, 0.0);
        assert_eq!(m.int, 0);
    }
}
