//! Dialing named shards on remote agents.
//!
//! A connection starts with one framed `ControlMessage`.  For reads the agent
//! then streams the shard's bytes and closes; an absent shard is closed
//! without sending anything.  For writes the executor streams the shard,
//! half-closes, and waits for the agent to close once the shard is stored.
//!
//! An agent may hold a read open until the shard appears, so every connection
//! is shut down when the pipe it feeds or drains is cancelled.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{read_message, write_message};
use crate::instruction::ShardLocation;
use crate::options::ExecutorOptions;
use crate::pipe::{CancelGuard, Cancellation, PipeReader, PipeWriter};

/// Handshake sent by the dialing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Stream the named shard back
    Read {
        /// Shard name
        shard: String,
        /// Name of the dialing executor
        reader: String,
        /// Whether the agent should send snappy frames
        compressed: bool,
    },
    /// Store the bytes that follow as the named shard
    Write {
        /// Shard name
        shard: String,
        /// Name of the dialing executor
        writer: String,
        /// Number of consumers that will read the shard
        reader_count: usize,
        /// Whether the bytes that follow are snappy frames
        compressed: bool,
    },
}

impl ControlMessage {
    /// Writes the handshake as one framed message.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        let data = bincode::serialize(self).map_err(|e| Error::Encode(e.to_string()))?;
        write_message(writer, &data)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a handshake, `Ok(None)` if the peer closed first.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Self>> {
        match read_message(reader)? {
            Some(data) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| Error::decode(e, &data)),
            None => Ok(None),
        }
    }
}

fn connect(location: &ShardLocation, options: &ExecutorOptions) -> Result<TcpStream> {
    let dial_error = |source: io::Error| Error::Dial {
        address: location.address.clone(),
        shard: location.name.clone(),
        source: source,
    };

    let mut last = None;
    for addr in location.address.to_socket_addrs().map_err(dial_error)? {
        match TcpStream::connect_timeout(&addr, options.connect_timeout()) {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(dial_error)?;
                return Ok(stream);
            }
            Err(e) => last = Some(e),
        }
    }
    Err(dial_error(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    })))
}

// Shuts the socket down once `cancel` fires, waking any blocked read or write.
fn watch(conn: &TcpStream, cancel: &Cancellation) -> Result<CancelGuard> {
    let watched = conn.try_clone()?;
    let guard = cancel.on_cancel(move || {
        if let Err(e) = watched.shutdown(Shutdown::Both) {
            trace!("Shutting down a cancelled connection: {}", e);
        }
    })?;
    Ok(guard)
}

// A cancelled socket reads as a clean end of stream, so the outcome of any
// step that ran under a cancelled signal is reported as the cancellation.
fn unless_cancelled<T, E: Into<Error>>(cancel: &Cancellation, res: ::std::result::Result<T, E>) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    res.map_err(Into::into)
}

/// Pulls the shard at `location` into `writer`, closing it when the remote
/// side is done.  A missing shard produces an empty stream.
pub fn dial_read_channel(
    executor: &str,
    location: &ShardLocation,
    mut writer: PipeWriter,
    options: &ExecutorOptions,
) -> Result<()> {
    debug!("{} connecting to {} to read {}", executor, location.address, location.name);
    let cancel = writer.cancellation().clone();
    let mut conn = unless_cancelled(&cancel, connect(location, options))?;
    let _watch = watch(&conn, &cancel)?;

    let handshake = ControlMessage::Read {
        shard: location.name.clone(),
        reader: executor.to_owned(),
        compressed: options.compression,
    }
    .write_to(&mut conn);
    unless_cancelled(&cancel, handshake)?;

    let copied = if options.compression {
        io::copy(&mut snap::read::FrameDecoder::new(&mut conn), &mut writer)
    } else {
        io::copy(&mut conn, &mut writer)
    };
    let copied = unless_cancelled(&cancel, copied)?;
    writer.close()?;

    if copied == 0 {
        debug!("{} read an empty {}", executor, location);
    } else {
        debug!("{} finished reading {} bytes from {}", executor, copied, location);
    }
    Ok(())
}

/// Pushes everything from `reader` into the shard at `location`.
/// `reader_count` tells the agent how many consumers will read the shard.
pub fn dial_write_channel(
    executor: &str,
    location: &ShardLocation,
    mut reader: PipeReader,
    reader_count: usize,
    options: &ExecutorOptions,
) -> Result<()> {
    debug!("{} connecting to {} to write {}", executor, location.address, location.name);
    let cancel = reader.cancellation().clone();
    let mut conn = unless_cancelled(&cancel, connect(location, options))?;
    let _watch = watch(&conn, &cancel)?;

    let handshake = ControlMessage::Write {
        shard: location.name.clone(),
        writer: executor.to_owned(),
        reader_count: reader_count,
        compressed: options.compression,
    }
    .write_to(&mut conn);
    unless_cancelled(&cancel, handshake)?;

    let streamed = stream_shard(&mut reader, &mut conn, options.compression);
    let copied = unless_cancelled(&cancel, streamed)?;

    debug!("{} finished writing {} bytes to {}", executor, copied, location);
    Ok(())
}

fn stream_shard(reader: &mut PipeReader, conn: &mut TcpStream, compressed: bool) -> io::Result<u64> {
    let copied = if compressed {
        let mut encoder = snap::write::FrameEncoder::new(&mut *conn);
        let n = io::copy(reader, &mut encoder)?;
        encoder.flush()?;
        n
    } else {
        io::copy(reader, conn)?
    };
    conn.flush()?;
    conn.shutdown(Shutdown::Write)?;

    // The agent closes its side once the shard is registered
    let mut trailer = Vec::new();
    conn.read_to_end(&mut trailer)?;
    Ok(copied)
}

#[cfg(test)]
mod test_netchan {
    use super::*;
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::frame::{read_row, write_row};
    use crate::pipe::{EdgeFormat, Piper};
    use crate::row::Value;

    type Shards = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    // Serves `connections` requests, storing payloads exactly as received.
    fn serve(connections: usize) -> (String, Shards) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let shards: Shards = Arc::new(Mutex::new(HashMap::new()));
        let store = shards.clone();
        thread::spawn(move || {
            for conn in listener.incoming().take(connections) {
                let mut conn = conn.unwrap();
                match ControlMessage::read_from(&mut conn).unwrap() {
                    Some(ControlMessage::Write { shard, .. }) => {
                        let mut data = Vec::new();
                        conn.read_to_end(&mut data).unwrap();
                        store.lock().unwrap().insert(shard, data);
                    }
                    Some(ControlMessage::Read { shard, .. }) => {
                        let data = store.lock().unwrap().get(&shard).cloned();
                        if let Some(data) = data {
                            conn.write_all(&data).unwrap();
                        }
                    }
                    None => {}
                }
            }
        });
        (address, shards)
    }

    fn round_trip(options: &ExecutorOptions) {
        let (address, shards) = serve(2);
        let location = ShardLocation::new("numbers", address.as_str());

        let (mut writer, reader) = Piper::rows().split();
        for i in 0..50i64 {
            write_row(&mut writer, &[Value::Int(i)]).unwrap();
        }
        writer.close().unwrap();
        dial_write_channel("test", &location, reader, 1, options).unwrap();
        assert!(shards.lock().unwrap().contains_key("numbers"));

        let (writer, mut reader) = Piper::rows().split();
        dial_read_channel("test", &location, writer, options).unwrap();
        let mut count = 0;
        while let Some(row) = read_row(&mut reader).unwrap() {
            assert_eq!(row, vec![Value::Int(count)]);
            count += 1;
        }
        assert_eq!(count, 50);
    }

    #[test]
    fn test_write_then_read() {
        round_trip(&ExecutorOptions::default());
    }

    #[test]
    fn test_write_then_read_compressed() {
        let options = ExecutorOptions { compression: true, ..ExecutorOptions::default() };
        round_trip(&options);
    }

    #[test]
    fn test_absent_shard_is_empty() {
        let (address, _shards) = serve(1);
        let location = ShardLocation::new("missing", address.as_str());
        let (writer, mut reader) = Piper::rows().split();
        dial_read_channel("test", &location, writer, &ExecutorOptions::default()).unwrap();
        assert!(read_row(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_unreachable_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let location = ShardLocation::new("nowhere", address.as_str());
        let (writer, _reader) = Piper::rows().split();
        match dial_read_channel("test", &location, writer, &ExecutorOptions::default()) {
            Err(Error::Dial { shard, .. }) => assert_eq!(shard, "nowhere"),
            other => panic!("unexpected {:?}", other),
        }
    }

    // Accepts connections and holds them open without ever answering.
    fn silent() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let mut held = Vec::new();
            for conn in listener.incoming() {
                held.push(conn);
            }
        });
        address
    }

    #[test]
    fn test_cancel_wakes_blocked_sockets() {
        let location = ShardLocation::new("pending", silent().as_str());
        let (handle, cancel) = Cancellation::new();
        let (tx, rx) = mpsc::channel();

        let (writer, _downstream) = Piper::new(4, 64, EdgeFormat::Rows, &cancel).split();
        let (reading_tx, reading_location) = (tx.clone(), location.clone());
        thread::spawn(move || {
            let res = dial_read_channel("test", &reading_location, writer, &ExecutorOptions::default());
            let _ = reading_tx.send(res);
        });

        let (upstream, reader) = Piper::new(4, 64, EdgeFormat::Rows, &cancel).split();
        upstream.close().unwrap();
        thread::spawn(move || {
            let res = dial_write_channel("test", &location, reader, 1, &ExecutorOptions::default());
            let _ = tx.send(res);
        });

        thread::sleep(Duration::from_millis(200));
        handle.cancel();
        for _ in 0..2 {
            let res = rx.recv_timeout(Duration::from_secs(5)).expect("dial still blocked after cancel");
            assert!(res.unwrap_err().is_cancelled());
        }
    }
}
