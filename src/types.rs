//! Scalar types shared across the on-disk record formats: `LBUINT`, the
//! frozen `LBTYPE` tag enumeration, and `CATID`.

use crate::error::{LogbaseError, Result};

/// Largest value an on-disk size or offset may take (32 bits unsigned).
pub const LBUINT_MAX: u64 = u32::MAX as u64;

/// Byte width of an `LBUINT` field on disk.
pub const LBUINT_SIZE: usize = 4;

/// Byte width of an `LBTYPE` tag on disk.
pub const LBTYPE_SIZE: usize = 1;

/// Byte width of a `CATID` on disk.
pub const CATID_SIZE: usize = 8;

/// Smallest catalog identifier the node overlay will allocate.
pub const CATID_MIN: u64 = 10;

/// Checked narrowing from a native size to an on-disk `LBUINT`.
pub fn to_lbuint(n: u64) -> Result<u32> {
    if n > LBUINT_MAX {
        Err(LogbaseError::IntOverflow(n))
    } else {
        Ok(n as u32)
    }
}

/// The frozen `LBTYPE` value-type tag enumeration (spec §6). Discriminants
/// are part of the on-disk wire format and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LbType {
    /// Absent value.
    Nil = 0,
    /// A value-location triple, reserved for future use by the core.
    Valoc = 10,
    /// Unsigned 8-bit integer.
    Uint8 = 50,
    /// Unsigned 16-bit integer.
    Uint16 = 51,
    /// Unsigned 32-bit integer.
    Uint32 = 52,
    /// Unsigned 64-bit integer.
    Uint64 = 53,
    /// Signed 8-bit integer.
    Int8 = 70,
    /// Signed 16-bit integer.
    Int16 = 71,
    /// Signed 32-bit integer.
    Int32 = 72,
    // Note the gap at 73: there is no INT48 or similar, the source simply
    // never used that discriminant.
    /// Signed 64-bit integer.
    Int64 = 74,
    /// IEEE-754 single-precision float.
    Float32 = 90,
    /// IEEE-754 double-precision float.
    Float64 = 91,
    /// Two `f32` lanes, real then imaginary.
    Complex64 = 110,
    /// Two `f64` lanes, real then imaginary.
    Complex128 = 111,
    /// A catalog identifier.
    CatId = 121,
    /// Opaque bytes.
    Bytes = 170,
    /// UTF-8 text.
    String = 171,
    /// A node-overlay location string.
    Location = 173,
    /// A set of catalog identifiers.
    CatIdSet = 180,
    /// A node's field map.
    Map = 181,
    /// Reserved for a future list value; unused by the core.
    List = 182,
    /// A node's namespaced name.
    CatKey = 190,
    /// A node in the "kind" namespace.
    Kind = 191,
    /// A node in the "doc" namespace.
    Doc = 192,
}

impl LbType {
    /// Decode a raw tag byte, rejecting anything outside the frozen
    /// enumeration with `BadType`.
    pub fn from_u8(tag: u8) -> Result<Self> {
        use LbType::*;
        Ok(match tag {
            0 => Nil,
            10 => Valoc,
            50 => Uint8,
            51 => Uint16,
            52 => Uint32,
            53 => Uint64,
            70 => Int8,
            71 => Int16,
            72 => Int32,
            74 => Int64,
            90 => Float32,
            91 => Float64,
            110 => Complex64,
            111 => Complex128,
            121 => CatId,
            170 => Bytes,
            171 => String,
            173 => Location,
            180 => CatIdSet,
            181 => Map,
            182 => List,
            190 => CatKey,
            191 => Kind,
            192 => Doc,
            other => return Err(LogbaseError::BadType(format!("unknown LBTYPE tag {other}"))),
        })
    }

    /// The raw tag byte for this type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether values of this type may be used as a catalog key (spec §6:
    /// "Only numeric types and STRING may be keys").
    pub fn is_key_type(self) -> bool {
        matches!(
            self,
            LbType::Uint8
                | LbType::Uint16
                | LbType::Uint32
                | LbType::Uint64
                | LbType::Int8
                | LbType::Int16
                | LbType::Int32
                | LbType::Int64
                | LbType::Float32
                | LbType::Float64
                | LbType::Complex64
                | LbType::Complex128
                | LbType::CatId
                | LbType::String
        )
    }
}
