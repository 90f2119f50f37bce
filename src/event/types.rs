use std::{borrow::Cow, str::FromStr};

use ordered_float::OrderedFloat;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrKey(Cow<'static, str>);

impl AttrKey {
    pub const fn new(k: String) -> Self {
        Self(Cow::Owned(k))
    }

    pub const fn new_static(k: &'static str) -> Self {
        Self(Cow::Borrowed(k))
    }
}

impl From<&str> for AttrKey {
    fn from(s: &str) -> Self {
        AttrKey(Cow::from(s.to_owned()))
    }
}

impl From<String> for AttrKey {
    fn from(s: String) -> Self {
        AttrKey(Cow::from(s))
    }
}

impl AsRef<str> for AttrKey {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<AttrKey> for String {
    fn from(k: AttrKey) -> Self {
        match k.0 {
            Cow::Borrowed(b) => b.to_owned(),
            Cow::Owned(o) => o,
        }
    }
}

impl std::fmt::Display for AttrKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.0)
    }
}

/////////////
// AttrVal //
/////////////

/// A typed event attribute value.
///
/// Text and binary are distinct variants all the way down to the wire. Strings with an
/// embedded NUL can't travel as text, so converting one into an `AttrVal` yields
/// [`AttrVal::Binary`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrVal {
    String(Cow<'static, str>),
    Binary(Vec<u8>),
    Integer(i64),
    Float(OrderedFloat<f64>),
    Bool(bool),
}

impl AttrVal {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrVal::String(_) => AttrType::String,
            AttrVal::Binary(_) => AttrType::Binary,
            AttrVal::Integer(_) => AttrType::Integer,
            AttrVal::Float(_) => AttrType::Float,
            AttrVal::Bool(_) => AttrType::Bool,
        }
    }

    pub fn as_string(self) -> std::result::Result<Cow<'static, str>, WrongAttrTypeError> {
        self.try_into()
    }

    pub fn as_binary(self) -> std::result::Result<Vec<u8>, WrongAttrTypeError> {
        self.try_into()
    }

    pub fn as_int(self) -> std::result::Result<i64, WrongAttrTypeError> {
        self.try_into()
    }

    pub fn as_float(self) -> std::result::Result<f64, WrongAttrTypeError> {
        self.try_into()
    }

    pub fn as_bool(self) -> std::result::Result<bool, WrongAttrTypeError> {
        self.try_into()
    }
}

impl std::fmt::Display for AttrVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrVal::String(s) => s.fmt(f),
            AttrVal::Binary(b) => write!(f, "0x{}", hex::encode(b)),
            AttrVal::Integer(i) => i.fmt(f),
            AttrVal::Float(fp) => fp.fmt(f),
            AttrVal::Bool(b) => b.fmt(f),
        }
    }
}

impl FromStr for AttrVal {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if let Ok(v) = s.to_lowercase().parse::<bool>() {
            v.into()
        } else if let Ok(v) = s.parse::<i64>() {
            v.into()
        } else if let Ok(v) = s.parse::<f64>() {
            v.into()
        } else {
            // N.B. This will trim any number of leading and trailing single or double quotes, It
            // does not have any ability to escape quote marks.
            s.trim_matches(|c| c == '"' || c == '\'').into()
        })
    }
}

fn text_or_binary(s: Cow<'static, str>) -> AttrVal {
    if s.contains('\0') {
        AttrVal::Binary(s.into_owned().into_bytes())
    } else {
        AttrVal::String(s)
    }
}

impl From<String> for AttrVal {
    fn from(s: String) -> AttrVal {
        text_or_binary(Cow::Owned(s))
    }
}

impl From<&str> for AttrVal {
    fn from(s: &str) -> AttrVal {
        text_or_binary(Cow::Owned(s.to_owned()))
    }
}

impl From<Cow<'static, str>> for AttrVal {
    fn from(s: Cow<'static, str>) -> Self {
        text_or_binary(s)
    }
}

impl From<&String> for AttrVal {
    fn from(s: &String) -> Self {
        text_or_binary(Cow::Owned(s.clone()))
    }
}

impl From<Vec<u8>> for AttrVal {
    fn from(b: Vec<u8>) -> AttrVal {
        AttrVal::Binary(b)
    }
}

impl From<&[u8]> for AttrVal {
    fn from(b: &[u8]) -> AttrVal {
        AttrVal::Binary(b.to_vec())
    }
}

impl From<bool> for AttrVal {
    fn from(b: bool) -> AttrVal {
        AttrVal::Bool(b)
    }
}

#[derive(Hash, Eq, PartialEq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum AttrType {
    String,
    Binary,
    Integer,
    Float,
    Bool,
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrType::String => "String",
            AttrType::Binary => "Binary",
            AttrType::Integer => "Integer",
            AttrType::Float => "Float",
            AttrType::Bool => "Bool",
        }
        .fmt(f)
    }
}

pub mod conversion {
    use std::convert::TryFrom;

    use super::*;

    macro_rules! impl_from_integer {
        ($ty:ty) => {
            impl From<$ty> for AttrVal {
                fn from(i: $ty) -> Self {
                    AttrVal::Integer(i as i64)
                }
            }
        };
    }

    impl_from_integer!(i8);
    impl_from_integer!(i16);
    impl_from_integer!(i32);
    impl_from_integer!(i64);
    impl_from_integer!(u8);
    impl_from_integer!(u16);
    impl_from_integer!(u32);

    macro_rules! impl_from_float {
        ($ty:ty) => {
            impl From<$ty> for AttrVal {
                fn from(f: $ty) -> Self {
                    AttrVal::Float((f as f64).into())
                }
            }
        };
    }

    impl_from_float!(f32);
    impl_from_float!(f64);

    macro_rules! impl_try_from_attr_val {
        ($variant:path, $ty:ty, $expected:path) => {
            impl TryFrom<AttrVal> for $ty {
                type Error = WrongAttrTypeError;

                fn try_from(value: AttrVal) -> std::result::Result<Self, Self::Error> {
                    if let $variant(x) = value {
                        Ok(x.into())
                    } else {
                        Err(WrongAttrTypeError {
                            actual: value.attr_type(),
                            expected: $expected,
                        })
                    }
                }
            }
        };
    }

    impl_try_from_attr_val!(AttrVal::String, Cow<'static, str>, AttrType::String);
    impl_try_from_attr_val!(AttrVal::Binary, Vec<u8>, AttrType::Binary);
    impl_try_from_attr_val!(AttrVal::Integer, i64, AttrType::Integer);
    impl_try_from_attr_val!(AttrVal::Float, f64, AttrType::Float);
    impl_try_from_attr_val!(AttrVal::Bool, bool, AttrType::Bool);
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("Wrong attribute type: expected {expected:?}, found {actual:?}")]
pub struct WrongAttrTypeError {
    actual: AttrType,
    expected: AttrType,
}
