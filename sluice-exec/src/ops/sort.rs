use std::cmp::Ordering;
use std::io::{Read, Write};

use priority_queue::PriorityQueue;
use rayon::prelude::*;

use sluice::frame::{for_each_message, write_message};
use sluice::row::{Comparator, Value};
use sluice::Result;

/// Reads the whole partition, sorts it stably by `cmp` and writes it out.
/// Nothing is written if any row fails to decode.
pub fn local_sort<R: Read, W: Write>(input: R, mut output: W, cmp: &Comparator) -> Result<()> {
    let mut rows: Vec<(Vec<Value>, Vec<u8>)> = Vec::new();
    for_each_message(input, |data| {
        let key = cmp.decode_keys(&data)?;
        rows.push((key, data));
        Ok(())
    })?;

    debug!("Sorting {} rows", rows.len());
    rows.par_sort_by(|a, b| cmp.compare_keys(&a.0, &b.0));

    for (_key, data) in rows.iter() {
        write_message(&mut output, data)?;
    }
    output.flush()?;
    Ok(())
}

// A candidate for the top n.  Later arrivals rank after earlier ones with
// the same key, so the heap's maximum is always the first row to evict.
struct Ranked<'a> {
    key: Vec<Value>,
    seq: usize,
    data: Vec<u8>,
    order: &'a Comparator,
}

impl<'a> PartialEq for Ranked<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a> Eq for Ranked<'a> {}

impl<'a> PartialOrd for Ranked<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for Ranked<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare_keys(&self.key, &other.key)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Writes the first `n` rows under `cmp`, in sorted order.  Only `n` rows are
/// held in memory at once.
pub fn local_top<R: Read, W: Write>(input: R, mut output: W, n: usize, cmp: &Comparator) -> Result<()> {
    let mut heap: PriorityQueue<usize, Ranked> = PriorityQueue::new();
    let mut seq = 0usize;
    for_each_message(input, |data| {
        let candidate = Ranked {
            key: cmp.decode_keys(&data)?,
            seq: seq,
            data: data,
            order: cmp,
        };
        seq += 1;

        let admit = heap.len() < n
            || match heap.peek() {
                Some((_, worst)) => candidate < *worst,
                None => false,
            };
        if admit {
            if heap.len() >= n {
                heap.pop();
            }
            heap.push(candidate.seq, candidate);
        }
        Ok(())
    })?;

    trace!("Kept {} of {} rows", heap.len(), seq);
    let mut kept = Vec::with_capacity(heap.len());
    while let Some((_, ranked)) = heap.pop() {
        kept.push(ranked);
    }
    for ranked in kept.iter().rev() {
        write_message(&mut output, &ranked.data)?;
    }
    output.flush()?;
    Ok(())
}
