use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, SeekFrom};

use sluice::frame::{for_each_message, line_to_row, write_row};
use sluice::instruction::InputType;
use sluice::row::{decode_row, Value};
use sluice::{Error, Result};

/// A byte range of one input file.  Lines that start inside the range
/// belong to it, so consecutive ranges never split or repeat a line.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSplit {
    /// File path
    pub path: String,
    /// First byte at which a line may start
    pub start: u64,
    /// Last byte at which a line may start, inclusive
    pub end: u64,
}

impl InputSplit {
    /// Parses `[path]` or `[path, start, end]`.
    pub fn from_row(data: &[u8]) -> Result<Self> {
        let row = decode_row(data)?;
        let path = match row.get(0) {
            Some(Value::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
            _ => return Err(Error::decode("input split row has no file path", data)),
        };
        match (row.get(1).and_then(Value::as_int), row.get(2).and_then(Value::as_int)) {
            (Some(start), Some(end)) if start >= 0 && end >= start => Ok(InputSplit {
                path: path,
                start: start as u64,
                end: end as u64,
            }),
            (None, None) if row.len() == 1 => Ok(InputSplit {
                path: path,
                start: 0,
                end: u64::MAX,
            }),
            _ => Err(Error::decode("input split row has a malformed byte range", data)),
        }
    }

    /// Calls `f` with every line of the range, newline included.
    pub fn for_each_line<F: FnMut(&[u8]) -> Result<()>>(&self, mut f: F) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut line = Vec::new();
        let mut offset = if self.start > 0 {
            // Skip through the end of the line holding byte `start - 1`; a
            // line starting exactly at `start` is kept
            reader.seek(SeekFrom::Start(self.start - 1))?;
            let size = reader.read_until(b'\n', &mut line)?;
            self.start - 1 + size as u64
        } else {
            0
        };

        while offset <= self.end {
            line.clear();
            let size = reader.read_until(b'\n', &mut line)?;
            if size == 0 {
                break;
            }
            offset += size as u64;
            f(&line)?;
        }
        Ok(())
    }
}

/// Reads the files named by incoming rows and writes one row per line.
pub fn input_split_reader<R: Read, W: Write>(input: R, mut output: W, input_type: InputType) -> Result<()> {
    for_each_message(input, |data| {
        let split = InputSplit::from_row(&data)?;
        debug!("Reading {} from {} to {}", split.path, split.start, split.end);
        split.for_each_line(|line| {
            let row = match input_type {
                InputType::Text => vec![Value::Bytes(strip_newline(line).to_vec())],
                InputType::Tsv => line_to_row(line),
            };
            write_row(&mut output, &row)
        })
    })?;
    output.flush()?;
    Ok(())
}

fn strip_newline(line: &[u8]) -> &[u8] {
    let mut line = line;
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line
}
