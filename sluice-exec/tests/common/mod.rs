#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use sluice::frame::{read_row, write_row};
use sluice::instruction::ShardLocation;
use sluice::netchan::ControlMessage;
use sluice::row::Row;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Store {
    shards: HashMap<String, Vec<u8>>,
    reader_counts: HashMap<String, usize>,
}

/// A minimal agent: stores written shards in memory and serves them back.
pub struct ShardServer {
    address: String,
    store: Arc<Mutex<Store>>,
}

fn serve(mut conn: TcpStream, store: Arc<Mutex<Store>>) {
    match ControlMessage::read_from(&mut conn) {
        Ok(Some(ControlMessage::Write { shard, reader_count, .. })) => {
            let mut data = Vec::new();
            if conn.read_to_end(&mut data).is_ok() {
                let mut store = store.lock().unwrap();
                store.shards.insert(shard.clone(), data);
                store.reader_counts.insert(shard, reader_count);
            }
        }
        Ok(Some(ControlMessage::Read { shard, .. })) => {
            let data = store.lock().unwrap().shards.get(&shard).cloned();
            if let Some(data) = data {
                let _ = conn.write_all(&data);
            }
        }
        _ => {}
    }
}

impl ShardServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let store = Arc::new(Mutex::new(Store::default()));
        let shared = store.clone();
        thread::spawn(move || {
            for conn in listener.incoming() {
                if let Ok(conn) = conn {
                    let store = shared.clone();
                    thread::spawn(move || serve(conn, store));
                }
            }
        });
        ShardServer {
            address: address,
            store: store,
        }
    }

    pub fn location(&self, name: &str) -> ShardLocation {
        ShardLocation::new(name, self.address.as_str())
    }

    pub fn put_rows(&self, name: &str, rows: &[Row]) {
        let mut data = Vec::new();
        for r in rows {
            write_row(&mut data, r).unwrap();
        }
        self.store.lock().unwrap().shards.insert(name.to_owned(), data);
    }

    pub fn has(&self, name: &str) -> bool {
        self.store.lock().unwrap().shards.contains_key(name)
    }

    pub fn rows(&self, name: &str) -> Vec<Row> {
        let data = self
            .store
            .lock()
            .unwrap()
            .shards
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("shard {} was never written", name));
        let mut reader = &data[..];
        let mut rows = Vec::new();
        while let Some(row) = read_row(&mut reader).unwrap() {
            rows.push(row);
        }
        rows
    }

    pub fn reader_count(&self, name: &str) -> Option<usize> {
        self.store.lock().unwrap().reader_counts.get(name).cloned()
    }
}

/// An agent that accepts connections and never answers, like one waiting
/// for a shard that is not written yet
pub fn silent_location(name: &str) -> ShardLocation {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let mut held = Vec::new();
        for conn in listener.incoming() {
            held.push(conn);
        }
    });
    ShardLocation::new(name, address.as_str())
}

/// An address nothing listens on
pub fn dead_location(name: &str) -> ShardLocation {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    ShardLocation::new(name, address.as_str())
}
