//! sluice
//!
//! `sluice` holds the pieces shared by every stage of a streaming instruction set:
//! the row codec, message framing, local pipes between stages, and the
//! network channels that move named shards between agents.
//!
//! What is it?
//! ---
//!
//! A compiled job arrives as an `InstructionSet`: an ordered list of streaming
//! operators, each with the shard locations it reads and writes.  The
//! executor in `sluice-exec` wires the stages together with `Piper`s and dials
//! the network for the endpoints of the chain.  Everything that travels between
//! stages is a stream of framed, binary-encoded rows.
//!
//! Example - Rows and keys
//! ---
//! ```rust
//! use sluice::instruction::OrderBy;
//! use sluice::row::{decode_row, encode_row, Comparator, Value};
//!
//! let row = vec![Value::Int(3), Value::from("c")];
//! let data = encode_row(&row).unwrap();
//! assert_eq!(decode_row(&data).unwrap(), row);
//!
//! let cmp = Comparator::new(&[OrderBy::desc(0)]);
//! let key = cmp.decode_keys(&data).unwrap();
//! assert_eq!(key, vec![Value::Int(3)]);
//! ```
//!
//! Example - Pipes
//! ---
//! ```rust
//! use std::thread;
//! use sluice::frame::{read_row, write_row};
//! use sluice::pipe::Piper;
//! use sluice::row::Value;
//!
//! let (mut writer, mut reader) = Piper::rows().split();
//! let producer = thread::spawn(move || {
//!     for i in 0..3i64 {
//!         write_row(&mut writer, &[Value::Int(i)]).unwrap();
//!     }
//! });
//!
//! let mut seen = 0;
//! while let Some(row) = read_row(&mut reader).unwrap() {
//!     assert_eq!(row[0], Value::Int(seen));
//!     seen += 1;
//! }
//! producer.join().unwrap();
//! assert_eq!(seen, 3);
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate log;

/// Error and Result types
pub mod error;

/// Row values, encoding and comparison
pub mod row;

/// Length-prefixed message framing
pub mod frame;

/// In-process pipes and cancellation
pub mod pipe;

/// Instructions and instruction sets
pub mod instruction;

/// Executor configuration
pub mod options;

/// Network shard channels
pub mod netchan;

pub use error::{Error, Result};
