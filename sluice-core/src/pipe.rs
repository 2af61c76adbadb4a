//! In-process byte conduits between adjacent stages.
//!
//! A `Piper` is a bounded channel of byte chunks with a `Write` end and a
//! `Read` end.  Dropping or closing the writer is the only end-of-stream
//! signal; dropping the reader makes further writes fail with `BrokenPipe`.
//! Both ends also watch a shared `Cancellation` so a failed pipeline cannot
//! leave stages blocked forever.

use std::io::{self, Read, Write};
use std::mem;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, never, select, Receiver, Sender, TryRecvError};

use crate::error::cancelled_io;

/// Default number of chunks buffered per pipe
pub const DEFAULT_CAPACITY: usize = 16;

/// Default chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// What travels across an edge of the local execution graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeFormat {
    /// Length-prefixed encoded rows
    Rows,
    /// Raw text lines, passed between two line-oriented processes
    Lines,
}

/// Receiving side of a pipeline-wide cancellation signal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    signal: Receiver<()>,
}

/// Triggers a `Cancellation`.
#[derive(Debug)]
pub struct CancelHandle {
    trigger: Mutex<Option<Sender<()>>>,
}

impl Cancellation {
    /// Creates a linked handle and signal.
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = bounded(0);
        let handle = CancelHandle {
            trigger: Mutex::new(Some(tx)),
        };
        (handle, Cancellation { signal: rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Cancellation { signal: never() }
    }

    /// True once the linked handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        match self.signal.try_recv() {
            Err(TryRecvError::Disconnected) => true,
            _ => false,
        }
    }

    /// Runs `f` on a watcher thread once the signal fires, or when the
    /// returned guard is dropped after it fired.  Used to wake ends that
    /// block outside a pipe, such as a socket read.
    pub fn on_cancel<F: FnOnce() + Send + 'static>(&self, f: F) -> io::Result<CancelGuard> {
        let (done, finished) = bounded::<()>(0);
        let cancel = self.clone();
        let watcher = thread::Builder::new()
            .name("cancel-watch".to_owned())
            .spawn(move || {
                let fired = select! {
                    recv(cancel.signal) -> _ => true,
                    recv(finished) -> _ => cancel.is_cancelled(),
                };
                if fired {
                    f();
                }
            })?;
        Ok(CancelGuard {
            done: Some(done),
            watcher: Some(watcher),
        })
    }
}

/// Stops watching a `Cancellation` when dropped.
#[derive(Debug)]
pub struct CancelGuard {
    done: Option<Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.done.take();
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                debug!("Cancel watcher panicked");
            }
        }
    }
}

impl CancelHandle {
    /// Wakes every pipe end watching the linked signal.
    pub fn cancel(&self) {
        if let Ok(mut trigger) = self.trigger.lock() {
            trigger.take();
        }
    }
}

/// A paired writer and reader.
pub struct Piper {
    /// Producer end
    pub writer: PipeWriter,
    /// Consumer end
    pub reader: PipeReader,
}

impl Piper {
    /// Creates a pipe holding at most `capacity` chunks of `chunk_size` bytes.
    pub fn new(capacity: usize, chunk_size: usize, format: EdgeFormat, cancel: &Cancellation) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        let chunk_size = chunk_size.max(1);
        Piper {
            writer: PipeWriter {
                tx: Some(tx),
                buf: Vec::with_capacity(chunk_size),
                chunk_size: chunk_size,
                format: format,
                cancel: cancel.clone(),
            },
            reader: PipeReader {
                rx: rx,
                chunk: Vec::new(),
                pos: 0,
                format: format,
                cancel: cancel.clone(),
            },
        }
    }

    /// Creates a row pipe with default sizes that is never cancelled.
    pub fn rows() -> Self {
        Piper::new(DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE, EdgeFormat::Rows, &Cancellation::never())
    }

    /// Splits the pipe into its ends.
    pub fn split(self) -> (PipeWriter, PipeReader) {
        (self.writer, self.reader)
    }
}

/// Write end of a pipe.  Writes are buffered into chunks.
pub struct PipeWriter {
    tx: Option<Sender<Vec<u8>>>,
    buf: Vec<u8>,
    chunk_size: usize,
    format: EdgeFormat,
    cancel: Cancellation,
}

impl PipeWriter {
    /// Format of the edge this writer feeds
    pub fn format(&self) -> EdgeFormat {
        self.format
    }

    /// Signal this end watches
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Flushes buffered bytes and signals end-of-stream to the reader.
    pub fn close(mut self) -> io::Result<()> {
        let res = self.flush();
        self.tx.take();
        res
    }

    fn send(&self, chunk: Vec<u8>) -> io::Result<()> {
        let tx = match self.tx {
            Some(ref tx) => tx,
            None => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe writer closed")),
        };
        select! {
            send(tx, chunk) -> res => res.map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed")
            }),
            recv(self.cancel.signal) -> _ => Err(cancelled_io()),
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.buf.is_empty() && self.buf.len() + data.len() > self.chunk_size {
            self.flush()?;
        }
        if data.len() >= self.chunk_size {
            self.send(data.to_vec())?;
        } else {
            self.buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        self.send(chunk)
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if self.tx.is_some() && !self.buf.is_empty() {
            let pending = self.buf.len();
            if let Err(e) = self.flush() {
                debug!("Dropping {} buffered bytes: {}", pending, e);
            }
        }
    }
}

/// Read end of a pipe.  Reports end-of-stream once every writer is gone.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
    format: EdgeFormat,
    cancel: Cancellation,
}

impl PipeReader {
    /// Format of the edge this reader drains
    pub fn format(&self) -> EdgeFormat {
        self.format
    }

    /// Signal this end watches
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            let next = select! {
                recv(self.rx) -> msg => msg.ok(),
                recv(self.cancel.signal) -> _ => return Err(cancelled_io()),
            };
            match next {
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = out.len().min(self.chunk.len() - self.pos);
        out[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod test_pipe {
    use super::*;
    use std::thread;

    use crate::error::Error;
    use crate::frame::{read_message, write_message};

    #[test]
    fn test_messages_cross_threads() {
        let (mut writer, mut reader) =
            Piper::new(2, 8, EdgeFormat::Rows, &Cancellation::never()).split();
        let producer = thread::spawn(move || {
            for i in 0..100u32 {
                write_message(&mut writer, &i.to_le_bytes()).unwrap();
            }
            writer.close().unwrap();
        });

        let mut count = 0u32;
        while let Some(data) = read_message(&mut reader).unwrap() {
            assert_eq!(data, count.to_le_bytes().to_vec());
            count += 1;
        }
        producer.join().unwrap();
        assert_eq!(count, 100);
    }

    #[test]
    fn test_dropped_writer_flushes() {
        let (mut writer, mut reader) = Piper::rows().split();
        writer.write_all(b"tail").unwrap();
        drop(writer);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"tail".to_vec());
    }

    #[test]
    fn test_dropped_reader_breaks_writer() {
        let (mut writer, reader) = Piper::new(1, 4, EdgeFormat::Rows, &Cancellation::never()).split();
        drop(reader);
        let err = writer.write_all(b"0123456789").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_cancel_wakes_blocked_ends() {
        let (handle, cancel) = Cancellation::new();
        let (mut writer, _reader) = Piper::new(1, 1, EdgeFormat::Rows, &cancel).split();
        let (_idle, mut starved) = Piper::new(1, 1, EdgeFormat::Lines, &cancel).split();

        let blocked = thread::spawn(move || writer.write_all(&[0u8; 16]));
        let waiting = thread::spawn(move || {
            let mut buf = [0u8; 4];
            starved.read(&mut buf)
        });

        handle.cancel();
        assert!(cancel.is_cancelled());
        let err: Error = blocked.join().unwrap().unwrap_err().into();
        assert!(err.is_cancelled());
        let err: Error = waiting.join().unwrap().unwrap_err().into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_on_cancel_runs_only_when_cancelled() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicUsize::new(0));
        let (handle, cancel) = Cancellation::new();

        let counter = fired.clone();
        let guard = cancel.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(guard.unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let counter = fired.clone();
        let guard = cancel
            .on_cancel(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.cancel();
        drop(guard);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
