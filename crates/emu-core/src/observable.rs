//! Read-only state inspection.
//!
//! Drives and cartridges expose their internal registers through string
//! paths so that debuggers and tests can look at them without touching
//! emulation state.

use std::fmt;

/// A dynamically-typed value returned by a state query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    String(String),
    /// Raw register file or buffer excerpt.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    /// Numeric view of the value, if it has one.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Bool(v) => Some(u64::from(*v)),
            Value::U8(v) => Some(u64::from(*v)),
            Value::U16(v) => Some(u64::from(*v)),
            Value::U32(v) => Some(u64::from(*v)),
            Value::U64(v) => Some(*v),
            Value::String(_) | Value::Bytes(_) | Value::Array(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v:#04X}"),
            Value::U16(v) => write!(f, "{v:#06X}"),
            Value::U32(v) => write!(f, "{v:#010X}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Bytes(bytes) => {
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// A component whose state can be inspected.
///
/// Queries never affect emulation state.
pub trait Observable {
    /// Query a property by dotted path, e.g. `rotation.ue7_counter` or
    /// `export.game`.
    ///
    /// Returns `None` if the path is not recognised.
    fn query(&self, path: &str) -> Option<Value>;

    /// All paths accepted by [`Observable::query`].
    fn query_paths(&self) -> &'static [&'static str];

    /// Every known path paired with its current value.
    fn dump(&self) -> Vec<(&'static str, Value)> {
        self.query_paths()
            .iter()
            .filter_map(|&path| self.query(path).map(|v| (path, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Latch {
        value: u8,
        enabled: bool,
    }

    impl Observable for Latch {
        fn query(&self, path: &str) -> Option<Value> {
            match path {
                "value" => Some(self.value.into()),
                "enabled" => Some(self.enabled.into()),
                _ => None,
            }
        }

        fn query_paths(&self) -> &'static [&'static str] {
            &["value", "enabled", "missing"]
        }
    }

    #[test]
    fn dump_skips_unknown_paths() {
        let latch = Latch {
            value: 0x3F,
            enabled: true,
        };
        let dump = latch.dump();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[0], ("value", Value::U8(0x3F)));
        assert_eq!(dump[1], ("enabled", Value::Bool(true)));
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::U8(0x0A).to_string(), "0x0A");
        assert_eq!(Value::U16(0xDE00).to_string(), "0xDE00");
        assert_eq!(Value::Bytes(vec![0xFF, 0x52]).to_string(), "FF 52");
        assert_eq!(
            Value::Array(vec![Value::Bool(false), Value::U64(7)]).to_string(),
            "[false, 7]"
        );
    }

    #[test]
    fn numeric_view() {
        assert_eq!(Value::Bool(true).as_u64(), Some(1));
        assert_eq!(Value::U32(0x1234).as_u64(), Some(0x1234));
        assert_eq!(Value::from("x").as_u64(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_tagged_enum() {
        let json = serde_json::to_string(&Value::U8(3)).expect("valid");
        assert_eq!(json, r#"{"U8":3}"#);
    }
}
