//! Compiled instructions and instruction sets.
//!
//! Instructions are produced by a planner elsewhere and consumed exactly once
//! by an executor.  The operator kinds form a closed set.

use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipe::EdgeFormat;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// One component of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field index in the row
    pub index: usize,
    /// Direction
    pub order: Order,
}

impl OrderBy {
    /// Ascending on `index`
    pub fn asc(index: usize) -> Self {
        OrderBy { index: index, order: Order::Ascending }
    }

    /// Descending on `index`
    pub fn desc(index: usize) -> Self {
        OrderBy { index: index, order: Order::Descending }
    }
}

/// A named shard reachable at a network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardLocation {
    /// Shard name, unique within the agent serving it
    pub name: String,
    /// `host:port` of the agent
    pub address: String,
}

impl ShardLocation {
    /// Creates a new location.
    pub fn new<N: Into<String>, A: Into<String>>(name: N, address: A) -> Self {
        ShardLocation {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for ShardLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// An external process.  With `is_pipe` set the process reads and writes text
/// lines; otherwise it speaks framed rows on stdin and stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Executable
    pub path: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Line oriented process
    #[serde(default)]
    pub is_pipe: bool,
}

impl Command {
    /// A line-oriented `sh -c` command.
    pub fn shell<S: Into<String>>(code: S) -> Self {
        Command {
            path: "sh".into(),
            args: vec!["-c".into(), code.into()],
            is_pipe: true,
        }
    }

    /// The full command line, for diagnostics
    pub fn command_line(&self) -> String {
        let mut line = self.path.clone();
        for arg in self.args.iter() {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How `InputSplitReader` turns file lines into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    /// One field per line
    Text,
    /// One field per tab separated column
    Tsv,
}

/// The operator an instruction runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    /// Stream through an external process
    Pipe(Command),
    /// Fully sort one partition in memory
    LocalSort {
        /// Sort keys
        order_bys: Vec<OrderBy>,
    },
    /// Run a shell template once per row
    PipeAsArgs {
        /// Template with `$1..$n` placeholders
        code: String,
    },
    /// K-way merge of sorted inputs
    MergeSortedTo {
        /// Order the inputs are sorted by
        order_bys: Vec<OrderBy>,
    },
    /// Route rows by key hash
    ScatterPartitions {
        /// Key fields
        indexes: Vec<usize>,
    },
    /// Route rows in turn
    RoundRobin,
    /// Concatenate several inputs
    CollectPartitions,
    /// Read the files named by incoming rows
    InputSplitReader {
        /// How lines become rows
        input_type: InputType,
    },
    /// Sort-merge join of two sorted, co-partitioned inputs
    JoinPartitionedSorted {
        /// Key fields
        indexes: Vec<usize>,
        /// Keep left rows without a match
        #[serde(default)]
        left_outer: bool,
        /// Keep right rows without a match
        #[serde(default)]
        right_outer: bool,
    },
    /// Per-key buckets of two sorted, co-partitioned inputs
    CoGroupPartitionedSorted {
        /// Key fields
        indexes: Vec<usize>,
    },
    /// First `n` rows under an order
    LocalTop {
        /// Rows to keep
        n: usize,
        /// Order that ranks the rows
        order_bys: Vec<OrderBy>,
    },
    /// Copy every row to every output
    Broadcast,
    /// Hash join against an in-memory table of the second input
    LocalHashAndJoinWith {
        /// Key fields
        indexes: Vec<usize>,
    },
}

/// Whether an endpoint uses the linear pipe chain or dials the network itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Single endpoint on the local pipe chain
    Chain,
    /// One network channel per declared shard location
    Dialed,
}

impl Operator {
    /// Short kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Operator::Pipe(_) => "Pipe",
            Operator::LocalSort { .. } => "LocalSort",
            Operator::PipeAsArgs { .. } => "PipeAsArgs",
            Operator::MergeSortedTo { .. } => "MergeSortedTo",
            Operator::ScatterPartitions { .. } => "ScatterPartitions",
            Operator::RoundRobin => "RoundRobin",
            Operator::CollectPartitions => "CollectPartitions",
            Operator::InputSplitReader { .. } => "InputSplitReader",
            Operator::JoinPartitionedSorted { .. } => "JoinPartitionedSorted",
            Operator::CoGroupPartitionedSorted { .. } => "CoGroupPartitionedSorted",
            Operator::LocalTop { .. } => "LocalTop",
            Operator::Broadcast => "Broadcast",
            Operator::LocalHashAndJoinWith { .. } => "LocalHashAndJoinWith",
        }
    }

    /// Where this operator takes its input from
    pub fn input_arity(&self) -> Arity {
        match self {
            Operator::MergeSortedTo { .. }
            | Operator::CollectPartitions
            | Operator::JoinPartitionedSorted { .. }
            | Operator::CoGroupPartitionedSorted { .. }
            | Operator::LocalHashAndJoinWith { .. } => Arity::Dialed,
            _ => Arity::Chain,
        }
    }

    /// True for processes that read text lines on stdin.
    pub fn consumes_lines(&self) -> bool {
        match self {
            Operator::Pipe(command) => command.is_pipe,
            _ => false,
        }
    }

    /// True for processes that write text lines on stdout.
    pub fn produces_lines(&self) -> bool {
        match self {
            Operator::Pipe(command) => command.is_pipe,
            Operator::PipeAsArgs { .. } => true,
            _ => false,
        }
    }
}

/// Format of the local edge from `producer` to `consumer`.  Lines only flow
/// directly between two line-oriented processes; every other edge carries rows.
pub fn edge_format(producer: &Operator, consumer: &Operator) -> EdgeFormat {
    if producer.produces_lines() && consumer.consumes_lines() {
        EdgeFormat::Lines
    } else {
        EdgeFormat::Rows
    }
}

/// One operator with its resolved shard locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Name used in logs and errors
    pub name: String,
    /// What to run
    pub operator: Operator,
    /// Declared inputs
    #[serde(default)]
    pub inputs: Vec<ShardLocation>,
    /// Declared outputs
    #[serde(default)]
    pub outputs: Vec<ShardLocation>,
    /// Memory hint from the planner, in MB
    #[serde(default)]
    pub memory_mb: u64,
}

impl Instruction {
    /// Creates an instruction without shard locations.
    pub fn new<S: Into<String>>(name: S, operator: Operator) -> Self {
        Instruction {
            name: name.into(),
            operator: operator,
            inputs: Vec::new(),
            outputs: Vec::new(),
            memory_mb: 0,
        }
    }

    /// Sets the declared inputs.
    pub fn with_inputs(mut self, inputs: Vec<ShardLocation>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets the declared outputs.
    pub fn with_outputs(mut self, outputs: Vec<ShardLocation>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets the memory hint.
    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Where this instruction takes its input from
    pub fn input_arity(&self) -> Arity {
        self.operator.input_arity()
    }

    /// Where this instruction sends its output
    pub fn output_arity(&self) -> Arity {
        match self.operator {
            Operator::ScatterPartitions { .. } | Operator::RoundRobin | Operator::Broadcast => Arity::Dialed,
            Operator::MergeSortedTo { .. } if self.outputs.len() > 1 => Arity::Dialed,
            _ => Arity::Chain,
        }
    }

    /// Estimated memory needed for a partition of `partition_size_mb`.
    pub fn memory_cost_mb(&self, partition_size_mb: u64, merge_budget_mb: u64) -> u64 {
        match self.operator {
            Operator::LocalSort { .. } => self.memory_mb.max(partition_size_mb),
            Operator::MergeSortedTo { .. } => merge_budget_mb,
            Operator::CollectPartitions => 3,
            Operator::LocalHashAndJoinWith { .. } => self.memory_mb.max(partition_size_mb),
            _ => 1,
        }
    }
}

fn default_reader_count() -> usize {
    1
}

/// An ordered list of instructions run together by one executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionSet {
    /// Stages, in pipeline order
    pub instructions: Vec<Instruction>,
    /// Readers expected for the final output shard
    #[serde(default = "default_reader_count")]
    pub reader_count: usize,
}

impl InstructionSet {
    /// Creates a set whose output has a single reader.
    pub fn new(instructions: Vec<Instruction>) -> Self {
        InstructionSet {
            instructions: instructions,
            reader_count: 1,
        }
    }

    /// Sets the number of readers of the final output.
    pub fn with_reader_count(mut self, reader_count: usize) -> Self {
        self.reader_count = reader_count;
        self
    }

    /// Parses an instruction set from json.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when there are no stages
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Checks that every instruction can be wired where it sits.
    pub fn validate(&self) -> Result<()> {
        if self.instructions.is_empty() {
            return Err(Error::config("<empty>", "instruction set has no instructions"));
        }
        if self.reader_count == 0 {
            return Err(Error::config("<set>", "reader count must be positive"));
        }

        let last = self.instructions.len() - 1;
        for (index, i) in self.instructions.iter().enumerate() {
            let is_pipe = match i.operator {
                Operator::Pipe(_) => true,
                _ => false,
            };

            match i.input_arity() {
                Arity::Dialed if index != 0 => {
                    return Err(Error::config(&i.name, "multi-input instructions must start the set"));
                }
                Arity::Dialed => {
                    let needs_two = match i.operator {
                        Operator::JoinPartitionedSorted { .. }
                        | Operator::CoGroupPartitionedSorted { .. }
                        | Operator::LocalHashAndJoinWith { .. } => true,
                        _ => false,
                    };
                    if needs_two && i.inputs.len() != 2 {
                        return Err(Error::config(
                            &i.name,
                            format!("expects 2 inputs, got {}", i.inputs.len()),
                        ));
                    }
                    if i.inputs.is_empty() {
                        return Err(Error::config(&i.name, "expects at least one input"));
                    }
                }
                Arity::Chain if index == 0 => {
                    if i.inputs.len() > 1 || (i.inputs.is_empty() && !is_pipe) {
                        return Err(Error::config(
                            &i.name,
                            format!("expects 1 input, got {}", i.inputs.len()),
                        ));
                    }
                }
                Arity::Chain => {}
            }

            match i.output_arity() {
                Arity::Dialed if index != last => {
                    return Err(Error::config(&i.name, "multi-output instructions must end the set"));
                }
                Arity::Dialed => {
                    if i.outputs.is_empty() {
                        return Err(Error::config(&i.name, "expects at least one output"));
                    }
                }
                Arity::Chain if index == last => {
                    if i.outputs.len() > 1 || (i.outputs.is_empty() && !is_pipe) {
                        return Err(Error::config(
                            &i.name,
                            format!("expects 1 output, got {}", i.outputs.len()),
                        ));
                    }
                }
                Arity::Chain => {}
            }

            match i.operator {
                Operator::LocalTop { n, .. } if n == 0 => {
                    return Err(Error::config(&i.name, "top n must be positive"));
                }
                Operator::JoinPartitionedSorted { ref indexes, .. }
                | Operator::CoGroupPartitionedSorted { ref indexes }
                | Operator::LocalHashAndJoinWith { ref indexes }
                | Operator::ScatterPartitions { ref indexes }
                    if indexes.is_empty() =>
                {
                    return Err(Error::config(&i.name, "key indexes must not be empty"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_instruction {
    use super::*;

    fn loc(name: &str) -> ShardLocation {
        ShardLocation::new(name, "127.0.0.1:1")
    }

    fn sort() -> Operator {
        Operator::LocalSort { order_bys: vec![OrderBy::asc(0)] }
    }

    #[test]
    fn test_edge_formats() {
        let pipe = Operator::Pipe(Command::shell("sort"));
        let framed = Operator::Pipe(Command { path: "lua".into(), args: vec![], is_pipe: false });
        let args = Operator::PipeAsArgs { code: "ls $1".into() };

        assert_eq!(edge_format(&pipe, &pipe), EdgeFormat::Lines);
        assert_eq!(edge_format(&args, &pipe), EdgeFormat::Lines);
        assert_eq!(edge_format(&pipe, &sort()), EdgeFormat::Rows);
        assert_eq!(edge_format(&sort(), &pipe), EdgeFormat::Rows);
        assert_eq!(edge_format(&pipe, &framed), EdgeFormat::Rows);
        assert_eq!(edge_format(&pipe, &args), EdgeFormat::Rows);
    }

    #[test]
    fn test_validate_chain() {
        let set = InstructionSet::new(vec![
            Instruction::new("sort", sort()).with_inputs(vec![loc("in")]),
            Instruction::new("top", Operator::LocalTop { n: 3, order_bys: vec![OrderBy::asc(0)] })
                .with_outputs(vec![loc("out")]),
        ]);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_misplaced_join() {
        let join = Operator::JoinPartitionedSorted { indexes: vec![0], left_outer: false, right_outer: false };
        let set = InstructionSet::new(vec![
            Instruction::new("sort", sort()).with_inputs(vec![loc("in")]),
            Instruction::new("join", join.clone())
                .with_inputs(vec![loc("a"), loc("b")])
                .with_outputs(vec![loc("out")]),
        ]);
        assert!(set.validate().is_err());

        let one_sided = InstructionSet::new(vec![
            Instruction::new("join", join).with_inputs(vec![loc("a")]).with_outputs(vec![loc("out")]),
        ]);
        match one_sided.validate() {
            Err(Error::Config { instruction, .. }) => assert_eq!(instruction, "join"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_validate_outputs() {
        let scatter = Instruction::new("scatter", Operator::ScatterPartitions { indexes: vec![0] })
            .with_inputs(vec![loc("in")]);
        assert!(InstructionSet::new(vec![scatter.clone()]).validate().is_err());
        let scatter = scatter.with_outputs(vec![loc("p0"), loc("p1")]);
        assert!(InstructionSet::new(vec![scatter]).validate().is_ok());

        // A trailing pipe may print to the executor's stdout
        let pipe = Instruction::new("print", Operator::Pipe(Command::shell("cat"))).with_inputs(vec![loc("in")]);
        assert!(InstructionSet::new(vec![pipe]).validate().is_ok());
    }

    #[test]
    fn test_merge_output_arity() {
        let merge = Instruction::new("merge", Operator::MergeSortedTo { order_bys: vec![OrderBy::asc(0)] })
            .with_inputs(vec![loc("a"), loc("b"), loc("c")]);
        assert_eq!(merge.clone().with_outputs(vec![loc("o")]).output_arity(), Arity::Chain);
        assert_eq!(merge.with_outputs(vec![loc("o1"), loc("o2")]).output_arity(), Arity::Dialed);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "instructions": [
                {
                    "name": "join",
                    "operator": {"JoinPartitionedSorted": {"indexes": [0], "left_outer": true}},
                    "inputs": [{"name": "a", "address": "h:1"}, {"name": "b", "address": "h:1"}],
                    "outputs": [{"name": "c", "address": "h:2"}]
                }
            ]
        }"#;
        let set = InstructionSet::from_json(json).unwrap();
        assert_eq!(set.reader_count, 1);
        assert_eq!(
            set.instructions[0].operator,
            Operator::JoinPartitionedSorted { indexes: vec![0], left_outer: true, right_outer: false }
        );
        assert!(set.validate().is_ok());

        assert!(InstructionSet::from_json(r#"{"instructions": [{"name": "x", "operator": "Shuffle"}]}"#).is_err());
    }

    #[test]
    fn test_memory_cost() {
        let i = Instruction::new("sort", sort()).with_memory_mb(64);
        assert_eq!(i.memory_cost_mb(10, 5), 64);
        assert_eq!(i.memory_cost_mb(100, 5), 100);
        let m = Instruction::new("merge", Operator::MergeSortedTo { order_bys: vec![] });
        assert_eq!(m.memory_cost_mb(100, 5), 5);
    }
}
