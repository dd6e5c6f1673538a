//! The in-memory value model: a tagged union of ten variants plus the
//! record (struct) tree that holds them.

/// Numeric element class. `bpe()` gives the on-disk byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericClass {
    Double,
    Single,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
}

impl NumericClass {
    pub fn bpe(&self) -> usize {
        match self {
            NumericClass::Double | NumericClass::Int64 | NumericClass::Uint64 => 8,
            NumericClass::Single | NumericClass::Int32 | NumericClass::Uint32 => 4,
            NumericClass::Int16 | NumericClass::Uint16 => 2,
            NumericClass::Int8 | NumericClass::Uint8 => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NumericClass::Double => "double",
            NumericClass::Single => "single",
            NumericClass::Int8 => "int8",
            NumericClass::Uint8 => "uint8",
            NumericClass::Int16 => "int16",
            NumericClass::Uint16 => "uint16",
            NumericClass::Int32 => "int32",
            NumericClass::Uint32 => "uint32",
            NumericClass::Int64 => "int64",
            NumericClass::Uint64 => "uint64",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "double" => NumericClass::Double,
            "single" => NumericClass::Single,
            "int8" => NumericClass::Int8,
            "uint8" => NumericClass::Uint8,
            "int16" => NumericClass::Int16,
            "uint16" => NumericClass::Uint16,
            "int32" => NumericClass::Int32,
            "uint32" => NumericClass::Uint32,
            "int64" => NumericClass::Int64,
            "uint64" => NumericClass::Uint64,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericValue {
    pub class: NumericClass,
    pub shape: Vec<u64>,
    pub real_le: Vec<u8>,
    pub imag_le: Option<Vec<u8>>,
}

impl NumericValue {
    pub fn complex(&self) -> bool {
        self.imag_le.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalValue {
    pub shape: Vec<u64>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringValue {
    pub shape: Vec<u64>,
    /// `None` entries are "missing".
    pub data: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharValue {
    pub shape: Vec<u64>,
    pub code_units: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateTimeValue {
    pub shape: Vec<u64>,
    pub timezone: String,
    pub locale: String,
    pub format: String,
    pub nat_mask: Vec<u8>,
    pub unix_ms: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurationValue {
    pub shape: Vec<u64>,
    pub nan_mask: Vec<u8>,
    pub ms: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDurationValue {
    pub shape: Vec<u64>,
    pub mask: Vec<u8>,
    pub months: Vec<i32>,
    pub days: Vec<i32>,
    pub time_ms: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalValue {
    pub shape: Vec<u64>,
    pub categories: Vec<String>,
    /// Codes are passed through; the meaning of code 0 is left to the caller.
    pub codes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueValue {
    pub kind: String,
    pub class: String,
    pub shape: Vec<u64>,
    pub complex: bool,
    pub encoding: String,
    pub bytes: Vec<u8>,
}

/// An insertion-ordered record (struct) tree: an explicit ordered list of
/// (key, value) pairs rather than an external ordered-map crate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Numeric(NumericValue),
    Logical(LogicalValue),
    String(StringValue),
    Char(CharValue),
    DateTime(DateTimeValue),
    Duration(DurationValue),
    CalendarDuration(CalendarDurationValue),
    Categorical(CategoricalValue),
    Opaque(OpaqueValue),
    Struct(Record),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Numeric(_) => "numeric",
            Value::Logical(_) => "logical",
            Value::String(_) => "string",
            Value::Char(_) => "char",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
            Value::CalendarDuration(_) => "calendarduration",
            Value::Categorical(_) => "categorical",
            Value::Opaque(_) => "opaque",
            Value::Struct(_) => "struct",
        }
    }

    pub fn as_struct(&self) -> Option<&Record> {
        match self {
            Value::Struct(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_struct_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Struct(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_class_bpe() {
        assert_eq!(NumericClass::Double.bpe(), 8);
        assert_eq!(NumericClass::Int8.bpe(), 1);
        assert_eq!(NumericClass::Uint32.bpe(), 4);
    }

    #[test]
    fn test_numeric_class_roundtrip_name() {
        for c in [
            NumericClass::Double,
            NumericClass::Single,
            NumericClass::Int8,
            NumericClass::Uint8,
            NumericClass::Int16,
            NumericClass::Uint16,
            NumericClass::Int32,
            NumericClass::Uint32,
            NumericClass::Int64,
            NumericClass::Uint64,
        ] {
            assert_eq!(NumericClass::parse(c.name()), Some(c));
        }
    }

    #[test]
    fn test_record_insert_overwrite_preserves_order() {
        let mut r = Record::new();
        r.insert("a", Value::Logical(LogicalValue { shape: vec![], data: vec![] }));
        r.insert("b", Value::Logical(LogicalValue { shape: vec![], data: vec![] }));
        r.insert(
            "a",
            Value::Logical(LogicalValue {
                shape: vec![1],
                data: vec![1],
            }),
        );
        let keys: Vec<&str> = r.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(r.get("a").unwrap().as_struct(), None);
    }

    #[test]
    fn test_empty_record_is_empty() {
        let r = Record::new();
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
    }
}
