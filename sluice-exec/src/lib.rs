//! sluice-exec
//!
//! `sluice-exec` runs compiled instruction sets.  It provides the streaming
//! operators (sort, merge, joins, partitioning, external processes) and the
//! `Executor` that wires a set of instructions together and runs them
//! concurrently.
//!
//! How to Use It?
//! ---
//!
//! Each instruction runs on its own thread.  Consecutive instructions are
//! linked by in-process pipes; the first instruction's input and the last
//! instruction's output are dialed to the shard locations they declare.
//! Multi-input instructions (merges, joins) and multi-output instructions
//! (scatter, round robin, broadcast) dial one channel per declared shard.
//!
//! The first failing instruction cancels the rest and its error is returned
//! from `execute_instruction_set`.
//!
//! Example - Operators
//! ---
//! The operators work on any `Read`/`Write` pair carrying framed rows.
//!
//! ```rust
//! use sluice::frame::{read_row, write_row};
//! use sluice::instruction::OrderBy;
//! use sluice::row::{Comparator, Value};
//! use sluice_exec::ops::sort::local_sort;
//!
//! let mut input = Vec::new();
//! for (k, v) in vec![(1, "a"), (3, "c"), (2, "b")] {
//!     write_row(&mut input, &[Value::Int(k), Value::from(v)]).unwrap();
//! }
//!
//! let mut output = Vec::new();
//! local_sort(&input[..], &mut output, &Comparator::new(&[OrderBy::asc(0)])).unwrap();
//!
//! let mut reader = &output[..];
//! let first = read_row(&mut reader).unwrap().unwrap();
//! assert_eq!(first, vec![Value::Int(1), Value::from("a")]);
//! ```
//!
//! Example - Running an instruction set
//! ---
//! ```rust,no_run
//! use sluice::instruction::{Instruction, InstructionSet, Operator, OrderBy, ShardLocation};
//! use sluice::options::ExecutorOptions;
//! use sluice_exec::Executor;
//!
//! let sort = Instruction::new("sort", Operator::LocalSort { order_bys: vec![OrderBy::asc(0)] })
//!     .with_inputs(vec![ShardLocation::new("words-0", "10.0.0.5:45326")])
//!     .with_outputs(vec![ShardLocation::new("sorted-0", "10.0.0.5:45326")]);
//!
//! let executor = Executor::new(ExecutorOptions::default(), InstructionSet::new(vec![sort]));
//! if let Err(e) = executor.execute_instruction_set() {
//!     eprintln!("{}", e);
//! }
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate log;

/// Streaming operators
pub mod ops;

/// Structured task groups with first-error cancellation
pub mod task;

/// Instruction set executor
pub mod executor;

pub use executor::Executor;
