//! Length-prefixed message framing for row streams.
//!
//! Each message is a 4 byte little-endian length followed by the payload.  A
//! stream that ends exactly on a message boundary is a normal end-of-stream.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::row::{decode_row, encode_row, Row, Value};

/// Largest message accepted by `read_message` (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Writes one framed message.
pub fn write_message<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message of {} bytes exceeds the frame limit", data.len()),
        ));
    }
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(data)
}

/// Reads one framed message.  Returns `Ok(None)` when the stream ends before
/// a new message starts; a stream ending inside a message is an error.
pub fn read_message<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a message header",
                ))
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message of {} bytes exceeds the frame limit", len),
        ));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(Some(data))
}

/// Calls `f` for every message until end-of-stream.
pub fn for_each_message<R, F>(mut reader: R, mut f: F) -> Result<()>
where
    R: Read,
    F: FnMut(Vec<u8>) -> Result<()>,
{
    while let Some(data) = read_message(&mut reader)? {
        f(data)?;
    }
    Ok(())
}

/// Encodes and writes one row.
pub fn write_row<W: Write + ?Sized>(writer: &mut W, row: &[Value]) -> Result<()> {
    let data = encode_row(row)?;
    write_message(writer, &data).map_err(Error::from)
}

/// Reads and decodes one row, `Ok(None)` at end-of-stream.
pub fn read_row<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Row>> {
    match read_message(reader)? {
        Some(data) => decode_row(&data).map(Some),
        None => Ok(None),
    }
}

/// Renders a row as a tab separated, newline terminated line.
pub fn row_to_line(row: &[Value]) -> Vec<u8> {
    let mut line = Vec::new();
    for (i, v) in row.iter().enumerate() {
        if i > 0 {
            line.push(b'\t');
        }
        match v {
            Value::Bytes(b) => line.extend_from_slice(b),
            other => line.extend_from_slice(other.to_string().as_bytes()),
        }
    }
    line.push(b'\n');
    line
}

/// Splits a line of process output into byte fields on tabs.
pub fn line_to_row(line: &[u8]) -> Row {
    let mut line = line;
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line.split(|b| *b == b'\t')
        .map(|field| Value::Bytes(field.to_vec()))
        .collect()
}

#[cfg(test)]
mod test_frame {
    use super::*;

    #[test]
    fn test_messages_and_end_of_stream() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"one").unwrap();
        write_message(&mut buf, b"").unwrap();
        write_message(&mut buf, b"three").unwrap();

        let mut reader = &buf[..];
        assert_eq!(read_message(&mut reader).unwrap(), Some(b"one".to_vec()));
        assert_eq!(read_message(&mut reader).unwrap(), Some(Vec::new()));
        assert_eq!(read_message(&mut reader).unwrap(), Some(b"three".to_vec()));
        assert_eq!(read_message(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_empty_stream_is_not_an_error() {
        let mut reader: &[u8] = &[];
        assert_eq!(read_message(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"payload").unwrap();

        let mut header_only = &buf[..2];
        assert!(read_message(&mut header_only).is_err());

        let mut body_cut = &buf[..buf.len() - 1];
        assert!(read_message(&mut body_cut).is_err());
    }

    #[test]
    fn test_rows() {
        let mut buf = Vec::new();
        write_row(&mut buf, &[1.into(), "a".into()]).unwrap();
        write_row(&mut buf, &[2.into(), "b".into()]).unwrap();

        let mut seen = Vec::new();
        for_each_message(&buf[..], |data| {
            seen.push(decode_row(&data)?);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], vec![Value::Int(2), "b".into()]);
    }

    #[test]
    fn test_lines() {
        let line = row_to_line(&["k".into(), 3.into(), Value::Float(0.5)]);
        assert_eq!(line, b"k\t3\t0.5\n".to_vec());
        assert_eq!(
            line_to_row(b"a\tb\r\n"),
            vec![Value::from("a"), Value::from("b")]
        );
    }
}
