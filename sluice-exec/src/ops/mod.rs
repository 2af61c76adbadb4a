//! Streaming operators.
//!
//! Every operator reads framed rows from `Read` inputs and writes framed rows
//! to `Write` outputs, flushing its outputs before returning successfully.
//! Outputs are closed by dropping them, which happens on the error path too.

/// Full in-memory sort and top-n
pub mod sort;

/// K-way merge of sorted streams
pub mod merge;

/// Sort-merge join, co-group and hash join
pub mod join;

/// Fan-out and fan-in of rows across shards
pub mod partition;

/// External processes
pub mod script;

/// Reading input files named by rows
pub mod split;
