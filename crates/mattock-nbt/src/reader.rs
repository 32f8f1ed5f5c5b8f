use crate::nbt::{
    NbtValue, TAG_BYTE, TAG_BYTE_ARRAY, TAG_COMPOUND, TAG_DOUBLE, TAG_END, TAG_FLOAT, TAG_INT,
    TAG_INT_ARRAY, TAG_LIST, TAG_LONG, TAG_LONG_ARRAY, TAG_SHORT, TAG_STRING,
};
use bytes::Buf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NbtError {
    #[error("unknown tag type {0}")]
    BadTag(u8),
    #[error("input ended inside a tag")]
    Truncated,
    #[error("tag name is not valid UTF-8")]
    BadString,
    #[error("root tag must be a compound, got type {0}")]
    BadRoot(u8),
}

pub type NbtResult<T> = Result<T, NbtError>;

/// Parse a named root: `[type][name_len:u16][name][payload]`.
pub fn read_root_named(input: &[u8]) -> NbtResult<(String, NbtValue)> {
    let mut buf = input;
    let tag = read_u8(&mut buf)?;
    if tag != TAG_COMPOUND {
        return Err(NbtError::BadRoot(tag));
    }
    let name = read_string(&mut buf)?;
    let value = read_payload(&mut buf, tag)?;
    Ok((name, value))
}

/// Parse a nameless root: `[type][payload]` (network NBT).
pub fn read_root_network(input: &[u8]) -> NbtResult<NbtValue> {
    let mut buf = input;
    let tag = read_u8(&mut buf)?;
    if tag != TAG_COMPOUND {
        return Err(NbtError::BadRoot(tag));
    }
    read_payload(&mut buf, tag)
}

fn read_u8(buf: &mut &[u8]) -> NbtResult<u8> {
    if buf.remaining() < 1 {
        return Err(NbtError::Truncated);
    }
    Ok(buf.get_u8())
}

fn read_string(buf: &mut &[u8]) -> NbtResult<String> {
    if buf.remaining() < 2 {
        return Err(NbtError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(NbtError::Truncated);
    }
    let bytes = &buf[..len];
    let s = std::str::from_utf8(bytes)
        .map_err(|_| NbtError::BadString)?
        .to_owned();
    buf.advance(len);
    Ok(s)
}

fn read_payload(buf: &mut &[u8], tag: u8) -> NbtResult<NbtValue> {
    match tag {
        TAG_BYTE => {
            if buf.remaining() < 1 {
                return Err(NbtError::Truncated);
            }
            Ok(NbtValue::Byte(buf.get_i8()))
        }
        TAG_SHORT => {
            if buf.remaining() < 2 {
                return Err(NbtError::Truncated);
            }
            Ok(NbtValue::Short(buf.get_i16()))
        }
        TAG_INT => {
            if buf.remaining() < 4 {
                return Err(NbtError::Truncated);
            }
            Ok(NbtValue::Int(buf.get_i32()))
        }
        TAG_LONG => {
            if buf.remaining() < 8 {
                return Err(NbtError::Truncated);
            }
            Ok(NbtValue::Long(buf.get_i64()))
        }
        TAG_FLOAT => {
            if buf.remaining() < 4 {
                return Err(NbtError::Truncated);
            }
            Ok(NbtValue::Float(buf.get_f32()))
        }
        TAG_DOUBLE => {
            if buf.remaining() < 8 {
                return Err(NbtError::Truncated);
            }
            Ok(NbtValue::Double(buf.get_f64()))
        }
        TAG_BYTE_ARRAY => {
            let len = read_array_len(buf)?;
            if buf.remaining() < len {
                return Err(NbtError::Truncated);
            }
            let mut out = Vec::with_capacity(len);
            for _ in 0..len {
                out.push(buf.get_i8());
            }
            Ok(NbtValue::ByteArray(out))
        }
        TAG_STRING => Ok(NbtValue::String(read_string(buf)?)),
        TAG_LIST => {
            let elem_tag = read_u8(buf)?;
            let len = read_array_len(buf)?;
            if elem_tag == TAG_END && len > 0 {
                return Err(NbtError::BadTag(TAG_END));
            }
            let mut out = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                out.push(read_payload(buf, elem_tag)?);
            }
            Ok(NbtValue::List(out))
        }
        TAG_COMPOUND => {
            let mut entries = Vec::new();
            loop {
                let child_tag = read_u8(buf)?;
                if child_tag == TAG_END {
                    break;
                }
                let name = read_string(buf)?;
                let value = read_payload(buf, child_tag)?;
                entries.push((name, value));
            }
            Ok(NbtValue::Compound(entries))
        }
        TAG_INT_ARRAY => {
            let len = read_array_len(buf)?;
            if buf.remaining() < len * 4 {
                return Err(NbtError::Truncated);
            }
            let mut out = Vec::with_capacity(len);
            for _ in 0..len {
                out.push(buf.get_i32());
            }
            Ok(NbtValue::IntArray(out))
        }
        TAG_LONG_ARRAY => {
            let len = read_array_len(buf)?;
            if buf.remaining() < len * 8 {
                return Err(NbtError::Truncated);
            }
            let mut out = Vec::with_capacity(len);
            for _ in 0..len {
                out.push(buf.get_i64());
            }
            Ok(NbtValue::LongArray(out))
        }
        other => Err(NbtError::BadTag(other)),
    }
}

fn read_array_len(buf: &mut &[u8]) -> NbtResult<usize> {
    if buf.remaining() < 4 {
        return Err(NbtError::Truncated);
    }
    let len = buf.get_i32();
    if len < 0 {
        return Ok(0);
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{nbt_compound, nbt_list};
    use bytes::BytesMut;

    fn roundtrip_named(value: &NbtValue, name: &str) -> (String, NbtValue) {
        let mut buf = BytesMut::new();
        value.write_root_named(name, &mut buf);
        read_root_named(&buf).unwrap()
    }

    #[test]
    fn test_named_roundtrip() {
        let value = nbt_compound! {
            "byte" => NbtValue::Byte(-3),
            "short" => NbtValue::Short(1234),
            "int" => NbtValue::Int(-77),
            "long" => NbtValue::Long(1 << 40),
            "float" => NbtValue::Float(1.5),
            "double" => NbtValue::Double(-2.25),
            "string" => NbtValue::String("hello".into()),
            "bytes" => NbtValue::ByteArray(vec![1, -2, 3]),
            "ints" => NbtValue::IntArray(vec![7, 8, 9]),
            "longs" => NbtValue::LongArray(vec![-1, 0, 1]),
            "list" => nbt_list![NbtValue::Int(1), NbtValue::Int(2)],
            "nested" => nbt_compound! {
                "inner" => NbtValue::String("deep".into()),
            },
        };
        let (name, parsed) = roundtrip_named(&value, "Data");
        assert_eq!(name, "Data");
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_network_roundtrip() {
        let value = nbt_compound! {
            "MOTION_BLOCKING" => NbtValue::LongArray(vec![42; 37]),
            "WORLD_SURFACE" => NbtValue::LongArray(vec![7; 37]),
        };
        let mut buf = BytesMut::new();
        value.write_root_network(&mut buf);
        let parsed = read_root_network(&buf).unwrap();
        assert_eq!(parsed, value);
        // Insertion order must survive the trip.
        if let NbtValue::Compound(entries) = parsed {
            assert_eq!(entries[0].0, "MOTION_BLOCKING");
            assert_eq!(entries[1].0, "WORLD_SURFACE");
        } else {
            panic!("not a compound");
        }
    }

    #[test]
    fn test_empty_list_roundtrip() {
        let value = nbt_compound! { "empty" => NbtValue::List(vec![]) };
        let mut buf = BytesMut::new();
        value.write_root_network(&mut buf);
        assert_eq!(read_root_network(&buf).unwrap(), value);
    }

    #[test]
    fn test_bad_tag() {
        // Compound containing a child with tag type 13 (undefined).
        let data = [TAG_COMPOUND, 13, 0, 1, b'x'];
        match read_root_network(&data) {
            Err(NbtError::BadTag(13)) => {}
            other => panic!("expected BadTag, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated() {
        let value = nbt_compound! { "k" => NbtValue::Long(9) };
        let mut buf = BytesMut::new();
        value.write_root_network(&mut buf);
        let cut = &buf[..buf.len() - 3];
        assert!(matches!(read_root_network(cut), Err(NbtError::Truncated)));
    }
}
