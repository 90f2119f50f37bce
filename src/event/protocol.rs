//! CBOR encoding of events.
//!
//! An event is an array of four items:
//!
//! ```text
//! [format version, X-Trace text, [edge op id bytes, ...], [key, value, key, value, ...]]
//! ```
//!
//! Attribute values keep their types on the wire: text is a CBOR text string, binary a byte
//! string, integers and doubles are CBOR numbers and booleans are CBOR simple values.

use crate::event::{AttrKey, AttrVal, Edge, Event};
use crate::identity::Identity;
use minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

pub const EVENT_FORMAT_VERSION: u8 = 1;

impl Encode for AttrVal {
    fn encode<W: encode::Write>(&self, e: &mut Encoder<W>) -> Result<(), encode::Error<W::Error>> {
        match self {
            AttrVal::String(s) => {
                e.str(s.as_ref())?;
            }
            AttrVal::Binary(b) => {
                e.bytes(b)?;
            }
            AttrVal::Integer(i) => {
                e.i64(*i)?;
            }
            AttrVal::Float(f) => {
                e.f64(**f)?;
            }
            AttrVal::Bool(b) => {
                e.bool(*b)?;
            }
        }

        Ok(())
    }
}

impl<'b> Decode<'b> for AttrVal {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, decode::Error> {
        use minicbor::data::Type;
        let t = d.datatype()?;
        match t {
            Type::Bool => Ok((d.bool()?).into()),

            Type::U8 => Ok((d.u8()?).into()),
            Type::U16 => Ok((d.u16()?).into()),
            Type::U32 => Ok((d.u32()?).into()),
            Type::I8 => Ok((d.i8()?).into()),
            Type::I16 => Ok((d.i16()?).into()),
            Type::I32 => Ok((d.i32()?).into()),
            Type::I64 => Ok((d.i64()?).into()),
            Type::U64 => {
                let u = d.u64()?;
                i64::try_from(u)
                    .map(AttrVal::Integer)
                    .map_err(|_| decode::Error::Message("Integer attribute out of range"))
            }

            Type::F32 => Ok((d.f32()?).into()),
            Type::F64 => Ok((d.f64()?).into()),

            // built directly; a text value holding a NUL is still text on the wire
            Type::String => Ok(AttrVal::String(d.str()?.to_owned().into())),
            Type::StringIndef => {
                let mut s = String::new();
                for s_res in d.str_iter()? {
                    s += s_res?;
                }
                Ok(AttrVal::String(s.into()))
            }

            Type::Bytes => Ok(AttrVal::Binary(d.bytes()?.to_vec())),
            Type::BytesIndef => {
                let mut b = Vec::new();
                for b_res in d.bytes_iter()? {
                    b.extend_from_slice(b_res?);
                }
                Ok(AttrVal::Binary(b))
            }

            _ => Err(decode::Error::TypeMismatch(
                t,
                "Unexpected datatype for AttrVal",
            )),
        }
    }
}

impl Encode for Edge {
    fn encode<W: encode::Write>(&self, e: &mut Encoder<W>) -> Result<(), encode::Error<W::Error>> {
        e.bytes(self.op_id())?;
        Ok(())
    }
}

impl<'b> Decode<'b> for Edge {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, decode::Error> {
        Edge::from_op_id(d.bytes()?).map_err(|_| decode::Error::Message("Invalid edge op id"))
    }
}

impl Encode for Event {
    fn encode<W: encode::Write>(&self, e: &mut Encoder<W>) -> Result<(), encode::Error<W::Error>> {
        e.array(4)?;
        e.u8(EVENT_FORMAT_VERSION)?;
        e.str(&self.identity().to_string())?;

        e.array(self.edges().len() as u64)?;
        for edge in self.edges() {
            edge.encode(e)?;
        }

        e.array((self.attrs().len() * 2) as u64)?;
        for (k, v) in self.attrs() {
            e.str(k.as_ref())?;
            v.encode(e)?;
        }

        Ok(())
    }
}

impl<'b> Decode<'b> for Event {
    fn decode(d: &mut Decoder<'b>) -> Result<Self, decode::Error> {
        if d.array()? != Some(4) {
            return Err(decode::Error::Message("Event must be a 4 element array"));
        }
        if d.u8()? != EVENT_FORMAT_VERSION {
            return Err(decode::Error::Message("Unknown event format version"));
        }

        let identity = Identity::from_text(d.str()?)
            .ok()
            .filter(Identity::is_valid)
            .ok_or(decode::Error::Message("Event X-Trace is not a valid identity"))?;

        let edges: Result<Vec<Edge>, decode::Error> = d.array_iter()?.collect();
        let edges = edges?;

        let arr_len = d
            .array()?
            .ok_or(decode::Error::Message("missing array length for attributes"))?;
        if arr_len % 2 != 0 {
            return Err(decode::Error::Message(
                "attributes must alternate keys and values",
            ));
        }
        let mut attrs = Vec::new();
        for _ in 0..arr_len / 2 {
            let key = AttrKey::from(d.str()?);
            attrs.push((key, AttrVal::decode(d)?));
        }

        Ok(Event::from_parts(identity, edges, attrs))
    }
}
