//! The closed, tagged value variant that stands in for the source's
//! dynamically-typed keys and values (spec §9, "Dynamic typing of keys").
//!
//! `Value` is deliberately one type for both roles: catalog keys and the
//! scalars carried inside node field maps. Construction at the API boundary
//! rejects anything `LbType::is_key_type` forbids when a key is required.

use std::hash::{Hash, Hasher};

use crate::types::LbType;

/// A typed scalar. Variants mirror the numeric, string and catalog-id
/// members of the frozen `LBTYPE` enumeration; `Bytes`, `Location` and
/// `CatIdSet` round out the values the node overlay stores in field maps
/// but are never valid as catalog keys.
#[derive(Debug, Clone)]
pub enum Value {
    /// UTF-8 text; a valid key type.
    String(String),
    /// Unsigned 8-bit integer; a valid key type.
    U8(u8),
    /// Unsigned 16-bit integer; a valid key type.
    U16(u16),
    /// Unsigned 32-bit integer; a valid key type.
    U32(u32),
    /// Unsigned 64-bit integer; a valid key type.
    U64(u64),
    /// Signed 8-bit integer; a valid key type.
    I8(i8),
    /// Signed 16-bit integer; a valid key type.
    I16(i16),
    /// Signed 32-bit integer; a valid key type.
    I32(i32),
    /// Signed 64-bit integer; a valid key type.
    I64(i64),
    /// IEEE-754 single-precision float; a valid key type.
    F32(f32),
    /// IEEE-754 double-precision float; a valid key type.
    F64(f64),
    /// Two IEEE-754 `f32` lanes, real then imaginary; a valid key type.
    C64(f32, f32),
    /// Two IEEE-754 `f64` lanes, real then imaginary; a valid key type.
    C128(f64, f64),
    /// A catalog identifier; a valid key type.
    CatId(u64),
    /// Opaque bytes; never a valid key.
    Bytes(Vec<u8>),
    /// A location string used by the node overlay; never a valid key.
    Location(String),
    /// A set of catalog identifiers (a node's parent set); never a valid key.
    CatIdSet(Vec<u64>),
}

impl Value {
    /// The `LBTYPE` tag this value would be encoded under.
    pub fn lbtype(&self) -> LbType {
        match self {
            Value::String(_) => LbType::String,
            Value::U8(_) => LbType::Uint8,
            Value::U16(_) => LbType::Uint16,
            Value::U32(_) => LbType::Uint32,
            Value::U64(_) => LbType::Uint64,
            Value::I8(_) => LbType::Int8,
            Value::I16(_) => LbType::Int16,
            Value::I32(_) => LbType::Int32,
            Value::I64(_) => LbType::Int64,
            Value::F32(_) => LbType::Float32,
            Value::F64(_) => LbType::Float64,
            Value::C64(..) => LbType::Complex64,
            Value::C128(..) => LbType::Complex128,
            Value::CatId(_) => LbType::CatId,
            Value::Bytes(_) => LbType::Bytes,
            Value::Location(_) => LbType::Location,
            Value::CatIdSet(_) => LbType::CatIdSet,
        }
    }

    /// Whether this value may be used as a catalog key (spec §6 key-type
    /// restriction).
    pub fn is_valid_key(&self) -> bool {
        self.lbtype().is_key_type()
    }
}

// `Value` is used as a `HashMap`/`HashSet` key for the master catalog and
// zapmap, including float and complex variants that have no derivable
// `Eq`/`Hash`. We compare and hash floats through their bit pattern, which
// is consistent (the same bits always hash and compare the same) even
// though it departs from IEEE-754 equality (NaN != NaN, -0.0 != 0.0 by
// `PartialEq` but not by bit pattern here).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (String(a), String(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (C64(ar, ai), C64(br, bi)) => ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits(),
            (C128(ar, ai), C128(br, bi)) => ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits(),
            (CatId(a), CatId(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Location(a), Location(b)) => a == b,
            (CatIdSet(a), CatIdSet(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use Value::*;
        std::mem::discriminant(self).hash(state);
        match self {
            String(s) => s.hash(state),
            U8(v) => v.hash(state),
            U16(v) => v.hash(state),
            U32(v) => v.hash(state),
            U64(v) => v.hash(state),
            I8(v) => v.hash(state),
            I16(v) => v.hash(state),
            I32(v) => v.hash(state),
            I64(v) => v.hash(state),
            F32(v) => v.to_bits().hash(state),
            F64(v) => v.to_bits().hash(state),
            C64(r, i) => {
                r.to_bits().hash(state);
                i.to_bits().hash(state);
            }
            C128(r, i) => {
                r.to_bits().hash(state);
                i.to_bits().hash(state);
            }
            CatId(v) => v.hash(state),
            Bytes(v) => v.hash(state),
            Location(v) => v.hash(state),
            CatIdSet(v) => v.hash(state),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}
