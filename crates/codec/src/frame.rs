use std::future::Future;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Error;

/// A single RESP frame.
///
/// Arrays may nest arbitrarily; every other variant is a leaf. The two
/// null forms are distinct from an empty array / empty bulk string and
/// round-trip as `*-1\r\n` and `$-1\r\n` respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Array(Vec<Frame>),
    Integer(i64),
    BulkString(Bytes),
    SimpleString(Bytes),
    Error(Bytes),
    NullArray,
    NullBulkString,
}

impl Frame {
    /// Builds the `*2\r\n$<len>\r\n<word>\r\n...` command array sent to
    /// query cluster topology. Used by discovery for `CLUSTER SLOTS` /
    /// `CLUSTER NODES`.
    pub fn command(words: &[&str]) -> Frame {
        Frame::Array(
            words
                .iter()
                .map(|w| Frame::BulkString(Bytes::copy_from_slice(w.as_bytes())))
                .collect(),
        )
    }

    /// True if this frame is an array of two bulk strings matching
    /// `first` and `second`, case-insensitively. Used by R1/R2 to detect
    /// `CLUSTER SLOTS` / `CLUSTER NODES` queries.
    pub fn is_command(&self, first: &str, second: &str) -> bool {
        match self {
            Frame::Array(items) if items.len() == 2 => {
                let word = |f: &Frame| match f {
                    Frame::BulkString(b) => std::str::from_utf8(b).ok(),
                    _ => None,
                };
                match (word(&items[0]), word(&items[1])) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(first) && b.eq_ignore_ascii_case(second),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

async fn read_line<R: AsyncRead + Unpin + ?Sized>(
    stream: &mut R,
    scratch: &mut BytesMut,
) -> Result<(), Error> {
    scratch.clear();

    loop {
        if scratch.len() == scratch.capacity() {
            return Err(Error::OversizeFrame);
        }

        let byte = stream.read_u8().await?;
        if byte == b'\r' {
            let next = stream.read_u8().await?;
            if next != b'\n' {
                return Err(Error::MalformedFrame);
            }

            return Ok(());
        }

        scratch.extend_from_slice(&[byte]);
    }
}

fn parse_i64(bytes: &[u8]) -> Result<i64, Error> {
    std::str::from_utf8(bytes)
        .map_err(Error::from)?
        .parse::<i64>()
        .map_err(|_| Error::MalformedFrame)
}

/// Reads exactly one RESP frame from `stream`, using `scratch` both for
/// line reads and, when decoding a bulk string, as the landing buffer for
/// its body. A bulk string longer than `scratch.capacity()` is a hard
/// error rather than a grown allocation, bounding per-connection memory.
pub fn read_frame<'a, R>(
    stream: &'a mut R,
    scratch: &'a mut BytesMut,
) -> Pin<Box<dyn Future<Output = Result<Frame, Error>> + Send + 'a>>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    Box::pin(async move {
        let tag = stream.read_u8().await?;

        match tag {
            b'*' => {
                read_line(stream, scratch).await?;
                let len = parse_i64(scratch)?;
                if len < 0 {
                    return Ok(Frame::NullArray);
                }

                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_frame(stream, scratch).await?);
                }

                Ok(Frame::Array(items))
            }
            b':' => {
                read_line(stream, scratch).await?;
                Ok(Frame::Integer(parse_i64(scratch)?))
            }
            b'$' => {
                read_line(stream, scratch).await?;
                let len = parse_i64(scratch)?;
                if len < 0 {
                    return Ok(Frame::NullBulkString);
                }

                let len = len as usize;
                if len > scratch.capacity() {
                    return Err(Error::OversizeFrame);
                }

                scratch.clear();
                scratch.resize(len, 0);
                stream.read_exact(&mut scratch[..]).await?;
                let body = Bytes::copy_from_slice(&scratch[..len]);

                let cr = stream.read_u8().await?;
                let lf = stream.read_u8().await?;
                if cr != b'\r' || lf != b'\n' {
                    return Err(Error::MalformedFrame);
                }

                Ok(Frame::BulkString(body))
            }
            b'+' => {
                read_line(stream, scratch).await?;
                Ok(Frame::SimpleString(Bytes::copy_from_slice(scratch)))
            }
            b'-' => {
                read_line(stream, scratch).await?;
                Ok(Frame::Error(Bytes::copy_from_slice(scratch)))
            }
            _ => Err(Error::MalformedFrame),
        }
    })
}

/// Writes `frame` to `sink` in its canonical encoding, returning the
/// number of bytes written.
pub fn write_frame<'a, W>(
    sink: &'a mut W,
    frame: &'a Frame,
) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    Box::pin(async move {
        let mut written = 0;

        match frame {
            Frame::Array(items) => {
                let header = format!("*{}\r\n", items.len());
                sink.write_all(header.as_bytes()).await?;
                written += header.len();

                for item in items {
                    written += write_frame(sink, item).await?;
                }
            }
            Frame::Integer(value) => {
                let line = format!(":{}\r\n", value);
                sink.write_all(line.as_bytes()).await?;
                written += line.len();
            }
            Frame::BulkString(bytes) => {
                let header = format!("${}\r\n", bytes.len());
                sink.write_all(header.as_bytes()).await?;
                sink.write_all(bytes).await?;
                sink.write_all(b"\r\n").await?;
                written += header.len() + bytes.len() + 2;
            }
            Frame::SimpleString(bytes) => {
                sink.write_all(b"+").await?;
                sink.write_all(bytes).await?;
                sink.write_all(b"\r\n").await?;
                written += 1 + bytes.len() + 2;
            }
            Frame::Error(bytes) => {
                sink.write_all(b"-").await?;
                sink.write_all(bytes).await?;
                sink.write_all(b"\r\n").await?;
                written += 1 + bytes.len() + 2;
            }
            Frame::NullArray => {
                sink.write_all(b"*-1\r\n").await?;
                written += 5;
            }
            Frame::NullBulkString => {
                sink.write_all(b"$-1\r\n").await?;
                written += 5;
            }
        }

        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(frame: Frame, cap: usize) -> Frame {
        let mut out = Vec::new();
        write_frame(&mut out, &frame).await.unwrap();

        let mut scratch = BytesMut::with_capacity(cap);
        let mut cursor = std::io::Cursor::new(out);
        read_frame(&mut cursor, &mut scratch).await.unwrap()
    }

    #[tokio::test]
    async fn round_trips_simple_string() {
        let frame = Frame::SimpleString(Bytes::from_static(b"OK"));
        assert_eq!(roundtrip(frame.clone(), 64).await, frame);
    }

    #[tokio::test]
    async fn round_trips_nested_array() {
        let frame = Frame::Array(vec![
            Frame::Integer(1),
            Frame::BulkString(Bytes::from_static(b"foo")),
            Frame::Array(vec![Frame::NullBulkString, Frame::NullArray]),
        ]);
        assert_eq!(roundtrip(frame.clone(), 64).await, frame);
    }

    #[tokio::test]
    async fn null_forms_round_trip() {
        assert_eq!(roundtrip(Frame::NullArray, 64).await, Frame::NullArray);
        assert_eq!(
            roundtrip(Frame::NullBulkString, 64).await,
            Frame::NullBulkString
        );
    }

    #[tokio::test]
    async fn oversize_bulk_string_is_rejected() {
        let mut out = Vec::new();
        write_frame(&mut out, &Frame::BulkString(Bytes::from_static(b"0123456789"))).await.unwrap();

        let mut scratch = BytesMut::with_capacity(4);
        let mut cursor = std::io::Cursor::new(out);
        let err = read_frame(&mut cursor, &mut scratch).await.unwrap_err();
        assert!(matches!(err, Error::OversizeFrame));
    }

    #[tokio::test]
    async fn unknown_leading_byte_is_malformed() {
        let mut scratch = BytesMut::with_capacity(64);
        let mut cursor = std::io::Cursor::new(b"!nope\r\n".to_vec());
        let err = read_frame(&mut cursor, &mut scratch).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFrame));
    }

    #[tokio::test]
    async fn command_detection_is_case_insensitive() {
        let frame = Frame::command(&["cluster", "SLOTS"]);
        assert!(frame.is_command("CLUSTER", "slots"));
        assert!(!frame.is_command("CLUSTER", "NODES"));
    }
}
