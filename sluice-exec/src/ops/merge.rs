use std::cmp::{Ordering, Reverse};
use std::io::{self, BufReader, Read, Write};
use std::thread;

use priority_queue::PriorityQueue;

use sluice::frame::{read_message, write_message};
use sluice::row::{Comparator, Value};
use sluice::{Error, Result};

/// Smallest read buffer given to a single merge source
pub const MIN_SOURCE_BUFFER: usize = 4 * 1024;

// The pending row of one source.  Equal keys are released in source order.
struct Head<'a> {
    key: Vec<Value>,
    source: usize,
    data: Vec<u8>,
    order: &'a Comparator,
}

impl<'a> PartialEq for Head<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a> Eq for Head<'a> {}

impl<'a> PartialOrd for Head<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for Head<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare_keys(&self.key, &other.key)
            .then(self.source.cmp(&other.source))
    }
}

type Heads<'a> = PriorityQueue<usize, Reverse<Head<'a>>>;

fn source_buffer(budget: usize, sources: usize) -> usize {
    (budget / sources.max(1)).max(MIN_SOURCE_BUFFER)
}

// Queues the next row of `source`; an exhausted source is simply not requeued.
fn refill<'a, R: Read>(queue: &mut Heads<'a>, reader: &mut R, source: usize, cmp: &'a Comparator) -> Result<()> {
    if let Some(data) = read_message(reader)? {
        let head = Head {
            key: cmp.decode_keys(&data)?,
            source: source,
            data: data,
            order: cmp,
        };
        queue.push(source, Reverse(head));
    }
    Ok(())
}

/// Merges streams already sorted by `cmp` into one sorted stream.
/// `budget` bytes of read buffering are shared among the sources.
pub fn merge_sorted<R: Read, W: Write>(inputs: Vec<R>, mut output: W, cmp: &Comparator, budget: usize) -> Result<()> {
    let capacity = source_buffer(budget, inputs.len());
    let mut sources: Vec<BufReader<R>> = inputs
        .into_iter()
        .map(|r| BufReader::with_capacity(capacity, r))
        .collect();

    let mut queue: Heads = PriorityQueue::new();
    for (source, reader) in sources.iter_mut().enumerate() {
        refill(&mut queue, reader, source, cmp)?;
    }

    let mut emitted = 0usize;
    while let Some((source, Reverse(head))) = queue.pop() {
        write_message(&mut output, &head.data)?;
        emitted += 1;
        refill(&mut queue, &mut sources[source], source, cmp)?;
    }

    trace!("Merged {} rows from {} sources", emitted, sources.len());
    output.flush()?;
    Ok(())
}

/// Merges N sorted inputs into P sorted outputs.  Inputs are taken in
/// groups of `ceil(N / P)`, one group per output, and each group is merged
/// on its own thread.  Outputs without a group are closed empty.
pub fn merge_sorted_to<R, W>(inputs: Vec<R>, outputs: Vec<W>, cmp: &Comparator, budget: usize) -> Result<()>
where
    R: Read + Send,
    W: Write + Send,
{
    let partitions = outputs.len();
    if partitions == 0 {
        return Err(Error::config("MergeSortedTo", "no outputs to merge into"));
    }
    if partitions == 1 {
        return match outputs.into_iter().next() {
            Some(output) => merge_sorted(inputs, output, cmp, budget),
            None => Ok(()),
        };
    }

    let group_size = ((inputs.len() + partitions - 1) / partitions).max(1);
    debug!(
        "Merging {} inputs into {} outputs, {} per group",
        inputs.len(),
        partitions,
        group_size
    );

    let mut groups: Vec<Vec<R>> = (0..partitions).map(|_| Vec::new()).collect();
    for (i, input) in inputs.into_iter().enumerate() {
        groups[i / group_size].push(input);
    }

    thread::scope(|s| {
        let handles: Vec<_> = groups
            .into_iter()
            .zip(outputs.into_iter())
            .map(|(group, output)| s.spawn(move || merge_sorted(group, output, cmp, budget)))
            .collect();

        let mut result = Ok(());
        for handle in handles {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(Error::Io(io::Error::new(io::ErrorKind::Other, "merge panicked"))));
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    })
}
