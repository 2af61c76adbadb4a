//! Joins over two co-partitioned inputs.
//!
//! A row is split into its key, the fields at the join indexes, and its
//! value, the remaining fields in their original order.  Joined rows are laid
//! out as `key ++ left value ++ right value`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::{Read, Write};

use sluice::frame::{for_each_message, read_message, write_row};
use sluice::row::{compare_all, decode_row, encode_row, Row, Value};
use sluice::{Error, Result};

/// Splits an encoded row into its key fields and the remaining fields.
pub fn split_key(data: &[u8], indexes: &[usize]) -> Result<(Vec<Value>, Row)> {
    let row = decode_row(data)?;
    if let Some(&missing) = indexes.iter().find(|&&i| i >= row.len()) {
        return Err(Error::decode(
            format!("join index {} beyond row width {}", missing, row.len()),
            data,
        ));
    }

    let key = indexes.iter().map(|&i| row[i].clone()).collect();
    let rest = row
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !indexes.contains(i))
        .map(|(_, v)| v)
        .collect();
    Ok((key, rest))
}

/// All consecutive rows sharing one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyGroup {
    /// The shared key
    pub key: Vec<Value>,
    /// Non-key fields of each row, in arrival order
    pub values: Vec<Row>,
}

/// Turns a stream sorted by key into a stream of `KeyGroup`s.  A group is
/// yielded as soon as the next key starts, so only one group is buffered.
pub struct KeyGroups<R> {
    reader: R,
    indexes: Vec<usize>,
    pending: Option<(Vec<Value>, Row)>,
    done: bool,
}

impl<R: Read> KeyGroups<R> {
    /// Groups `reader` on the fields at `indexes`.
    pub fn new(reader: R, indexes: &[usize]) -> Self {
        KeyGroups {
            reader: reader,
            indexes: indexes.to_vec(),
            pending: None,
            done: false,
        }
    }

    fn next_row(&mut self) -> Result<Option<(Vec<Value>, Row)>> {
        match read_message(&mut self.reader)? {
            Some(data) => split_key(&data, &self.indexes).map(Some),
            None => Ok(None),
        }
    }

    fn next_group(&mut self) -> Result<Option<KeyGroup>> {
        let (key, first) = match self.pending.take() {
            Some(row) => row,
            None => match self.next_row()? {
                Some(row) => row,
                None => return Ok(None),
            },
        };

        let mut values = vec![first];
        while let Some((next_key, value)) = self.next_row()? {
            if compare_all(&next_key, &key) == Ordering::Equal {
                values.push(value);
            } else {
                self.pending = Some((next_key, value));
                break;
            }
        }
        Ok(Some(KeyGroup { key: key, values: values }))
    }
}

impl<R: Read> Iterator for KeyGroups<R> {
    type Item = Result<KeyGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_group() {
            Ok(Some(group)) => Some(Ok(group)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn joined(key: &[Value], left: &[Value], right: &[Value]) -> Row {
    let mut row = Vec::with_capacity(key.len() + left.len() + right.len());
    row.extend_from_slice(key);
    row.extend_from_slice(left);
    row.extend_from_slice(right);
    row
}

// Walks both grouped streams in key order, handing each step to `emit`.
// Either side may be absent when its key has no counterpart.
fn merge_groups<L, R, F>(left: L, right: R, indexes: &[usize], mut emit: F) -> Result<()>
where
    L: Read,
    R: Read,
    F: FnMut(Option<&KeyGroup>, Option<&KeyGroup>) -> Result<()>,
{
    let mut lefts = KeyGroups::new(left, indexes);
    let mut rights = KeyGroups::new(right, indexes);
    let mut l = lefts.next().transpose()?;
    let mut r = rights.next().transpose()?;

    loop {
        match (l.take(), r.take()) {
            (Some(lg), Some(rg)) => match compare_all(&lg.key, &rg.key) {
                Ordering::Equal => {
                    emit(Some(&lg), Some(&rg))?;
                    l = lefts.next().transpose()?;
                    r = rights.next().transpose()?;
                }
                Ordering::Less => {
                    emit(Some(&lg), None)?;
                    l = lefts.next().transpose()?;
                    r = Some(rg);
                }
                Ordering::Greater => {
                    emit(None, Some(&rg))?;
                    r = rights.next().transpose()?;
                    l = Some(lg);
                }
            },
            (Some(lg), None) => {
                emit(Some(&lg), None)?;
                l = lefts.next().transpose()?;
            }
            (None, Some(rg)) => {
                emit(None, Some(&rg))?;
                r = rights.next().transpose()?;
            }
            (None, None) => return Ok(()),
        }
    }
}

/// Sort-merge join of two inputs sorted ascending on the fields at `indexes`.
/// Matching keys emit the cross product of both groups; unmatched groups are
/// emitted on their own only when that side is outer.
pub fn join_partitioned_sorted<L, R, W>(
    left: L,
    right: R,
    mut output: W,
    indexes: &[usize],
    left_outer: bool,
    right_outer: bool,
) -> Result<()>
where
    L: Read,
    R: Read,
    W: Write,
{
    let mut emitted = 0usize;
    merge_groups(left, right, indexes, |lg, rg| {
        match (lg, rg) {
            (Some(lg), Some(rg)) => {
                for lv in lg.values.iter() {
                    for rv in rg.values.iter() {
                        write_row(&mut output, &joined(&lg.key, lv, rv))?;
                        emitted += 1;
                    }
                }
            }
            (Some(lg), None) if left_outer => {
                for lv in lg.values.iter() {
                    write_row(&mut output, &joined(&lg.key, lv, &[]))?;
                    emitted += 1;
                }
            }
            (None, Some(rg)) if right_outer => {
                for rv in rg.values.iter() {
                    write_row(&mut output, &joined(&rg.key, &[], rv))?;
                    emitted += 1;
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    trace!("Joined {} rows", emitted);
    output.flush()?;
    Ok(())
}

fn bucket(group: Option<&KeyGroup>) -> Value {
    let rows = group
        .map(|g| g.values.iter().cloned().map(Value::List).collect())
        .unwrap_or_else(Vec::new);
    Value::List(rows)
}

/// Co-groups two inputs sorted ascending on the fields at `indexes`.  Emits
/// one row per key seen on either side: `key ++ [left rows, right rows]`,
/// each bucket a list of the rows' non-key fields.
pub fn cogroup_partitioned_sorted<L, R, W>(left: L, right: R, mut output: W, indexes: &[usize]) -> Result<()>
where
    L: Read,
    R: Read,
    W: Write,
{
    merge_groups(left, right, indexes, |lg, rg| {
        let key = match lg.or(rg) {
            Some(g) => &g.key,
            None => return Ok(()),
        };
        let mut row = key.clone();
        row.push(bucket(lg));
        row.push(bucket(rg));
        write_row(&mut output, &row)
    })?;
    output.flush()?;
    Ok(())
}

/// Hash join: the second input is loaded into memory keyed by its encoded
/// key, then the first input is streamed against it.  Output rows follow the
/// order of the first input.
pub fn local_hash_and_join_with<L, R, W>(left: L, right: R, mut output: W, indexes: &[usize]) -> Result<()>
where
    L: Read,
    R: Read,
    W: Write,
{
    let mut table: HashMap<Vec<u8>, Vec<Row>> = HashMap::new();
    let mut loaded = 0usize;
    for_each_message(right, |data| {
        let (key, value) = split_key(&data, indexes)?;
        table.entry(encode_row(&key)?).or_insert_with(Vec::new).push(value);
        loaded += 1;
        Ok(())
    })?;
    debug!("Hash table holds {} rows under {} keys", loaded, table.len());

    for_each_message(left, |data| {
        let (key, value) = split_key(&data, indexes)?;
        if let Some(matches) = table.get(&encode_row(&key)?) {
            for other in matches.iter() {
                write_row(&mut output, &joined(&key, &value, other))?;
            }
        }
        Ok(())
    })?;
    output.flush()?;
    Ok(())
}
