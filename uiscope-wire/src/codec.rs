// Buffer read/write helpers for wire data types

use crate::protocol::{WireError, WireResult};
use crate::types::{tags, Value, ValueData};
use bytes::Buf;

/// Read a length-prefixed UTF-8 string (4-byte length + bytes).
pub fn read_string(buf: &mut &[u8]) -> WireResult<String> {
    if buf.remaining() < 4 {
        return Err(WireError::Protocol(
            "not enough data for string length".to_string(),
        ));
    }

    let len = buf.get_u32() as usize;

    if buf.remaining() < len {
        return Err(WireError::Protocol(format!(
            "not enough data for string: expected {}, got {}",
            len,
            buf.remaining()
        )));
    }

    let bytes = &buf[..len];
    buf.advance(len);

    String::from_utf8(bytes.to_vec())
        .map_err(|e| WireError::Protocol(format!("invalid UTF-8 in string: {}", e)))
}

/// Write a length-prefixed UTF-8 string into a packet body.
pub fn put_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

pub fn read_u8(buf: &mut &[u8]) -> WireResult<u8> {
    if buf.remaining() < 1 {
        return Err(WireError::Protocol("not enough data for u8".to_string()));
    }
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut &[u8]) -> WireResult<u16> {
    if buf.remaining() < 2 {
        return Err(WireError::Protocol("not enough data for u16".to_string()));
    }
    Ok(buf.get_u16())
}

pub fn read_i32(buf: &mut &[u8]) -> WireResult<i32> {
    if buf.remaining() < 4 {
        return Err(WireError::Protocol("not enough data for i32".to_string()));
    }
    Ok(buf.get_i32())
}

pub fn read_u32(buf: &mut &[u8]) -> WireResult<u32> {
    if buf.remaining() < 4 {
        return Err(WireError::Protocol("not enough data for u32".to_string()));
    }
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut &[u8]) -> WireResult<u64> {
    if buf.remaining() < 8 {
        return Err(WireError::Protocol("not enough data for u64".to_string()));
    }
    Ok(buf.get_u64())
}

/// Read one value given its already-consumed type tag.
pub fn read_value_by_tag(tag: u8, buf: &mut &[u8]) -> WireResult<ValueData> {
    match tag {
        tags::BYTE => {
            if buf.remaining() < 1 {
                return Err(WireError::Protocol("short byte value".to_string()));
            }
            Ok(ValueData::Byte(buf.get_i8()))
        }
        tags::CHAR => Ok(ValueData::Char(read_u16(buf)?)),
        tags::DOUBLE => {
            if buf.remaining() < 8 {
                return Err(WireError::Protocol("short double value".to_string()));
            }
            Ok(ValueData::Double(buf.get_f64()))
        }
        tags::FLOAT => {
            if buf.remaining() < 4 {
                return Err(WireError::Protocol("short float value".to_string()));
            }
            Ok(ValueData::Float(buf.get_f32()))
        }
        tags::INT => Ok(ValueData::Int(read_i32(buf)?)),
        tags::LONG => {
            if buf.remaining() < 8 {
                return Err(WireError::Protocol("short long value".to_string()));
            }
            Ok(ValueData::Long(buf.get_i64()))
        }
        tags::SHORT => {
            if buf.remaining() < 2 {
                return Err(WireError::Protocol("short short value".to_string()));
            }
            Ok(ValueData::Short(buf.get_i16()))
        }
        tags::BOOLEAN => Ok(ValueData::Boolean(read_u8(buf)? != 0)),
        tags::VOID => Ok(ValueData::Void),
        tags::OBJECT
        | tags::STRING
        | tags::THREAD
        | tags::THREAD_GROUP
        | tags::CLASS_LOADER
        | tags::CLASS_OBJECT
        | tags::ARRAY => Ok(ValueData::Object(read_u64(buf)?)),
        _ => Err(WireError::Protocol(format!("unknown value tag: {}", tag))),
    }
}

/// Read a tagged value (tag byte followed by data).
pub fn read_tagged_value(buf: &mut &[u8]) -> WireResult<Value> {
    let tag = read_u8(buf)?;
    let data = read_value_by_tag(tag, buf)?;
    Ok(Value { tag, data })
}

/// Write a value with its tag prefix (invocation arguments).
pub fn put_tagged_value(out: &mut Vec<u8>, value: &Value) {
    out.push(value.tag);
    put_untagged_value(out, value);
}

/// Write a value without its tag (field writes, primitive array regions).
pub fn put_untagged_value(out: &mut Vec<u8>, value: &Value) {
    match &value.data {
        ValueData::Byte(v) => out.push(*v as u8),
        ValueData::Char(v) => out.extend_from_slice(&v.to_be_bytes()),
        ValueData::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        ValueData::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
        ValueData::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        ValueData::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        ValueData::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
        ValueData::Boolean(v) => out.push(*v as u8),
        ValueData::Object(id) => out.extend_from_slice(&id.to_be_bytes()),
        ValueData::Void => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let mut out = Vec::new();
        put_string(&mut out, "java.awt.Window");

        let mut buf = out.as_slice();
        assert_eq!(read_string(&mut buf).unwrap(), "java.awt.Window");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_string_truncated() {
        let mut out = Vec::new();
        put_string(&mut out, "hello");
        out.truncate(7);

        let mut buf = out.as_slice();
        assert!(read_string(&mut buf).is_err());
    }

    #[test]
    fn test_tagged_value_roundtrip() {
        let values = [
            Value::int(42),
            Value::boolean(true),
            Value::object(tags::OBJECT, 0xDEAD),
            Value::long(-7),
        ];

        for value in &values {
            let mut out = Vec::new();
            put_tagged_value(&mut out, value);

            let mut buf = out.as_slice();
            let back = read_tagged_value(&mut buf).unwrap();
            assert_eq!(back.tag, value.tag);
            assert!(buf.is_empty());
        }
    }
}
