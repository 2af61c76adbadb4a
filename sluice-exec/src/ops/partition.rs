use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::io::{self, Read, Write};
use std::sync::Mutex;
use std::thread;

use sluice::frame::{for_each_message, write_message};
use sluice::row::{decode_row_keys, encode_row};
use sluice::{Error, Result};

fn require_outputs<W>(outputs: &[W], operator: &str) -> Result<()> {
    if outputs.is_empty() {
        return Err(Error::config(operator, "no outputs to write to"));
    }
    Ok(())
}

fn flush_all<W: Write>(outputs: &mut [W]) -> Result<()> {
    for output in outputs.iter_mut() {
        output.flush()?;
    }
    Ok(())
}

/// Shard for an encoded key.  Stable across processes, so every executor
/// routes a key to the same shard.
pub fn partition_of(key: &[u8], partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(key);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// Routes every row to one output, chosen by hashing the fields at `indexes`.
pub fn scatter_partitions<R: Read, W: Write>(input: R, mut outputs: Vec<W>, indexes: &[usize]) -> Result<()> {
    require_outputs(&outputs, "ScatterPartitions")?;
    let partitions = outputs.len();
    let mut counts = vec![0usize; partitions];
    for_each_message(input, |data| {
        let key = decode_row_keys(&data, indexes)?;
        let shard = partition_of(&encode_row(&key)?, partitions);
        write_message(&mut outputs[shard], &data)?;
        counts[shard] += 1;
        Ok(())
    })?;
    debug!("Scattered rows as {:?}", counts);
    flush_all(&mut outputs)
}

/// Deals rows to the outputs in turn.
pub fn round_robin<R: Read, W: Write>(input: R, mut outputs: Vec<W>) -> Result<()> {
    require_outputs(&outputs, "RoundRobin")?;
    let mut next = 0usize;
    for_each_message(input, |data| {
        write_message(&mut outputs[next], &data)?;
        next = (next + 1) % outputs.len();
        Ok(())
    })?;
    flush_all(&mut outputs)
}

/// Copies every row to every output.
pub fn broadcast<R: Read, W: Write>(input: R, mut outputs: Vec<W>) -> Result<()> {
    require_outputs(&outputs, "Broadcast")?;
    for_each_message(input, |data| {
        for output in outputs.iter_mut() {
            write_message(output, &data)?;
        }
        Ok(())
    })?;
    flush_all(&mut outputs)
}

/// Copies all inputs into one output concurrently.  Rows from one input keep
/// their order; rows from different inputs interleave whole.
pub fn collect_partitions<R, W>(inputs: Vec<R>, output: W) -> Result<()>
where
    R: Read + Send,
    W: Write + Send,
{
    let output = Mutex::new(output);
    let shared = &output;
    let result = thread::scope(|s| {
        let handles: Vec<_> = inputs
            .into_iter()
            .map(|input| {
                s.spawn(move || {
                    for_each_message(input, |data| {
                        let mut out = shared
                            .lock()
                            .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::Other, "output lock poisoned")))?;
                        write_message(&mut *out, &data)?;
                        Ok(())
                    })
                })
            })
            .collect();

        let mut result = Ok(());
        for handle in handles {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(Error::Io(io::Error::new(io::ErrorKind::Other, "collector panicked"))));
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    });
    result?;

    let mut output = output
        .into_inner()
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::Other, "output lock poisoned")))?;
    output.flush()?;
    Ok(())
}
