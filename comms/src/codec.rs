//! Byte-level framing shared by every request and response.
//!
//! A frame is laid out as `[kind: u32][meta_len: u32][meta: json][payload: f32...]`,
//! both headers big endian and every payload value little endian. The JSON metadata carries the scalar fields of the message
//! and the payload carries the flattened feature map, if any.

use std::io;

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const F32_SIZE: usize = size_of::<f32>();

pub trait Serialize {
    /// Appends the wire representation of `self` to `buf`.
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()>;

    /// Serializes `self` into a freshly allocated buffer.
    fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.serialize(&mut buf)?;
        Ok(buf)
    }
}

pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}

/// A frame split into its raw sections.
pub(crate) struct Frame<'a> {
    pub kind: u32,
    pub meta: &'a [u8],
    pub payload: &'a [u8],
}

pub(crate) fn invalid_data<T>(msg: impl Into<String>) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
}

/// Writes a whole frame at the end of `buf`.
///
/// # Arguments
/// * `buf` - The output buffer.
/// * `kind` - The message kind written in the first header.
/// * `meta` - The metadata, serialized as json.
/// * `payload` - The flat numeric payload, may be empty.
pub(crate) fn write_frame<M>(buf: &mut Vec<u8>, kind: u32, meta: &M, payload: &[f32]) -> io::Result<()>
where
    M: serde::Serialize,
{
    buf.extend_from_slice(&kind.to_be_bytes());

    let len_at = buf.len();
    buf.extend_from_slice(&[0; HEADER_SIZE]);
    serde_json::to_writer(&mut *buf, meta)?;

    let meta_len = buf.len() - len_at - HEADER_SIZE;
    let Ok(meta_len) = Header::try_from(meta_len) else {
        return invalid_data(format!("metadata of {meta_len} bytes does not fit the header"));
    };

    buf[len_at..len_at + HEADER_SIZE].copy_from_slice(&meta_len.to_be_bytes());
    buf.reserve(payload.len() * F32_SIZE);
    buf.extend(payload.iter().flat_map(|v| v.to_le_bytes()));
    Ok(())
}

/// Splits `buf` into its frame sections without interpreting them.
pub(crate) fn read_frame(buf: &[u8]) -> io::Result<Frame<'_>> {
    let too_small = || {
        invalid_data(format!(
            "the given buffer is too small {}, must at least be {} bytes",
            buf.len(),
            2 * HEADER_SIZE
        ))
    };

    let Some((kind, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
        return too_small();
    };
    let Some((meta_len, rest)) = rest.split_first_chunk::<HEADER_SIZE>() else {
        return too_small();
    };

    let meta_len = Header::from_be_bytes(*meta_len) as usize;
    if rest.len() < meta_len {
        return invalid_data(format!(
            "metadata length {meta_len} exceeds the remaining {} bytes",
            rest.len()
        ));
    }

    let (meta, payload) = rest.split_at(meta_len);
    Ok(Frame {
        kind: Header::from_be_bytes(*kind),
        meta,
        payload,
    })
}

/// Decodes the little endian payload values.
pub(crate) fn read_payload(payload: &[u8]) -> io::Result<Vec<f32>> {
    if payload.len() % F32_SIZE != 0 {
        return invalid_data(format!(
            "payload of {} bytes is not a whole number of f32 values",
            payload.len()
        ));
    }

    let values = bytemuck::cast_slice::<u8, [u8; F32_SIZE]>(payload);
    Ok(values.iter().map(|bytes| f32::from_le_bytes(*bytes)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sections_survive_a_write_read_cycle() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 7, &serde_json::json!({ "a": 1 }), &[1.5, -2.0]).unwrap();

        let frame = read_frame(&buf).unwrap();
        assert_eq!(frame.kind, 7);
        assert_eq!(frame.meta, br#"{"a":1}"#);
        assert_eq!(read_payload(frame.payload).unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn payload_values_are_little_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1, &serde_json::json!({}), &[1.0, -0.5]).unwrap();

        let payload = &buf[buf.len() - 2 * F32_SIZE..];
        assert_eq!(&payload[..F32_SIZE], &1.0f32.to_le_bytes());
        assert_eq!(&payload[F32_SIZE..], &(-0.5f32).to_le_bytes());
        assert_eq!(read_payload(&[0, 0, 128, 63]).unwrap(), vec![1.0]);
    }

    #[test]
    fn truncated_headers_are_rejected() {
        let err = read_frame(&[0, 0, 0, 1, 0]).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn metadata_longer_than_the_buffer_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(b"{}");

        assert!(read_frame(&buf).is_err());
    }

    #[test]
    fn ragged_payload_is_rejected() {
        assert!(read_payload(&[0, 0, 128]).is_err());
    }
}
