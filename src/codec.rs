//! C1: the byte codec. Pure functions that turn typed scalars into
//! big-endian byte sequences and back, plus the CRC32/IEEE checksum used
//! by log records.

use crate::error::{LogbaseError, Result};
use crate::key::Value;
use crate::types::{CATID_SIZE, LbType};

/// Encode a value to its raw on-disk bytes under the given type. The
/// value's own `LbType` must match `t`; callers that already hold a
/// `Value` of the right type (the common case) never hit this.
pub fn encode_scalar(v: &Value, t: LbType) -> Result<Vec<u8>> {
    if v.lbtype() != t {
        return Err(LogbaseError::BadType(format!(
            "value is {:?}, cannot encode as {:?}",
            v.lbtype(),
            t
        )));
    }
    Ok(match v {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Location(s) => s.as_bytes().to_vec(),
        Value::U8(n) => vec![*n],
        Value::U16(n) => n.to_be_bytes().to_vec(),
        Value::U32(n) => n.to_be_bytes().to_vec(),
        Value::U64(n) => n.to_be_bytes().to_vec(),
        Value::I8(n) => vec![*n as u8],
        Value::I16(n) => n.to_be_bytes().to_vec(),
        Value::I32(n) => n.to_be_bytes().to_vec(),
        Value::I64(n) => n.to_be_bytes().to_vec(),
        Value::F32(n) => n.to_be_bytes().to_vec(),
        Value::F64(n) => n.to_be_bytes().to_vec(),
        Value::C64(re, im) => {
            let mut buf = Vec::with_capacity(8);
            buf.extend_from_slice(&re.to_be_bytes());
            buf.extend_from_slice(&im.to_be_bytes());
            buf
        }
        Value::C128(re, im) => {
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&re.to_be_bytes());
            buf.extend_from_slice(&im.to_be_bytes());
            buf
        }
        Value::CatId(id) => id.to_be_bytes().to_vec(),
        Value::Bytes(b) => b.clone(),
        Value::CatIdSet(ids) => {
            let mut buf = Vec::with_capacity(ids.len() * CATID_SIZE);
            for id in ids {
                buf.extend_from_slice(&id.to_be_bytes());
            }
            buf
        }
    })
}

/// Decode raw bytes into a typed value. `UnexpectedSize` covers both a
/// short/long buffer for a fixed-width type and a `CATID_SET` whose byte
/// length is not a multiple of 8.
pub fn decode_scalar(bytes: &[u8], t: LbType) -> Result<Value> {
    fn want(bytes: &[u8], n: usize) -> Result<()> {
        if bytes.len() != n {
            return Err(LogbaseError::UnexpectedSize {
                offset: 0,
                context: format!("expected {n} bytes, got {}", bytes.len()),
            });
        }
        Ok(())
    }

    Ok(match t {
        LbType::String => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        LbType::Location => Value::Location(String::from_utf8_lossy(bytes).into_owned()),
        LbType::Uint8 => {
            want(bytes, 1)?;
            Value::U8(bytes[0])
        }
        LbType::Uint16 => {
            want(bytes, 2)?;
            Value::U16(u16::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Uint32 => {
            want(bytes, 4)?;
            Value::U32(u32::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Uint64 => {
            want(bytes, 8)?;
            Value::U64(u64::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Int8 => {
            want(bytes, 1)?;
            Value::I8(bytes[0] as i8)
        }
        LbType::Int16 => {
            want(bytes, 2)?;
            Value::I16(i16::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Int32 => {
            want(bytes, 4)?;
            Value::I32(i32::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Int64 => {
            want(bytes, 8)?;
            Value::I64(i64::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Float32 => {
            want(bytes, 4)?;
            Value::F32(f32::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Float64 => {
            want(bytes, 8)?;
            Value::F64(f64::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Complex64 => {
            want(bytes, 8)?;
            let re = f32::from_be_bytes(bytes[0..4].try_into().unwrap());
            let im = f32::from_be_bytes(bytes[4..8].try_into().unwrap());
            Value::C64(re, im)
        }
        LbType::Complex128 => {
            want(bytes, 16)?;
            let re = f64::from_be_bytes(bytes[0..8].try_into().unwrap());
            let im = f64::from_be_bytes(bytes[8..16].try_into().unwrap());
            Value::C128(re, im)
        }
        LbType::CatId => {
            want(bytes, 8)?;
            Value::CatId(u64::from_be_bytes(bytes.try_into().unwrap()))
        }
        LbType::Bytes => Value::Bytes(bytes.to_vec()),
        LbType::CatIdSet => {
            if bytes.len() % CATID_SIZE != 0 {
                return Err(LogbaseError::UnexpectedSize {
                    offset: 0,
                    context: format!(
                        "CATID_SET byte length {} is not a multiple of {CATID_SIZE}",
                        bytes.len()
                    ),
                });
            }
            Value::CatIdSet(
                bytes
                    .chunks_exact(CATID_SIZE)
                    .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
                    .collect(),
            )
        }
        other => {
            return Err(LogbaseError::BadType(format!(
                "{other:?} has no scalar decoding"
            )))
        }
    })
}

/// CRC32/IEEE over `bytes`, matching the checksum stored at the tail of
/// every log record.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let t = v.lbtype();
        let bytes = encode_scalar(&v, t).unwrap();
        let back = decode_scalar(&bytes, t).unwrap();
        assert_eq!(format!("{:?}", v), format!("{:?}", back));
    }

    #[test]
    fn scalar_round_trips() {
        roundtrip(Value::String("hello".into()));
        roundtrip(Value::U8(7));
        roundtrip(Value::U16(700));
        roundtrip(Value::U32(70_000));
        roundtrip(Value::U64(7_000_000_000));
        roundtrip(Value::I8(-7));
        roundtrip(Value::I16(-700));
        roundtrip(Value::I32(-70_000));
        roundtrip(Value::I64(-7_000_000_000));
        roundtrip(Value::F32(1.5));
        roundtrip(Value::F64(2.5));
        roundtrip(Value::C64(1.0, -1.0));
        roundtrip(Value::C128(1.0, -1.0));
        roundtrip(Value::CatId(42));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
        roundtrip(Value::CatIdSet(vec![10, 11, 12]));
    }

    #[test]
    fn catid_set_rejects_misaligned_length() {
        let err = decode_scalar(&[0u8; 5], LbType::CatIdSet).unwrap_err();
        assert!(matches!(err, LogbaseError::UnexpectedSize { .. }));
    }

    #[test]
    fn crc32_matches_known_vector() {
        // "123456789" is the standard CRC-32/IEEE check string.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
