use std::thread::{self, Scope};

use sluice::instruction::{edge_format, Arity, Instruction, InstructionSet, Operator, ShardLocation};
use sluice::netchan::{dial_read_channel, dial_write_channel};
use sluice::options::ExecutorOptions;
use sluice::pipe::{Cancellation, EdgeFormat, PipeReader, PipeWriter};
use sluice::row::Comparator;
use sluice::{Error, Result};

use crate::ops::{join, merge, partition, script, sort, split};
use crate::task::TaskGroup;

// The pipe ends handed to one instruction.
#[derive(Default)]
struct Endpoints {
    // Chain input from the previous stage or the input shard
    input: Option<PipeReader>,
    // Chain output to the next stage or the output shard
    output: Option<PipeWriter>,
    // One reader per declared input of a multi-input instruction
    inputs: Vec<PipeReader>,
    // One writer per declared output of a multi-output instruction
    outputs: Vec<PipeWriter>,
}

fn require<T>(endpoint: Option<T>, instruction: &Instruction, what: &str) -> Result<T> {
    endpoint.ok_or_else(|| Error::config(&instruction.name, format!("has no {}", what)))
}

fn two<T>(mut endpoints: Vec<T>, instruction: &Instruction) -> Result<(T, T)> {
    match (endpoints.pop(), endpoints.pop(), endpoints.is_empty()) {
        (Some(second), Some(first), true) => Ok((first, second)),
        _ => Err(Error::config(&instruction.name, "expects exactly 2 inputs")),
    }
}

/// Runs one instruction set: every instruction on its own thread, linked by
/// local pipes, with the ends of the chain dialed out to shard locations.
pub struct Executor {
    options: ExecutorOptions,
    instruction_set: InstructionSet,
}

impl Executor {
    /// Creates an executor for `instruction_set`.
    pub fn new(options: ExecutorOptions, instruction_set: InstructionSet) -> Self {
        Executor {
            options: options,
            instruction_set: instruction_set,
        }
    }

    /// Options in effect
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Instructions to run
    pub fn instruction_set(&self) -> &InstructionSet {
        &self.instruction_set
    }

    /// Validates the set, runs every instruction and dial to completion, and
    /// returns the first failure.  Once any task fails the rest are cancelled.
    pub fn execute_instruction_set(&self) -> Result<()> {
        let name = &self.options.name;
        if let Err(e) = self.instruction_set.validate() {
            error!("{} rejected the instruction set: {}", name, e);
            return Err(e);
        }

        let instructions = &self.instruction_set.instructions;
        info!("{} executing {} instructions", name, instructions.len());
        if log_enabled!(log::Level::Debug) {
            for (i, instruction) in instructions.iter().enumerate() {
                debug!(
                    "{}: {} {} inputs={:?} outputs={:?}",
                    i,
                    instruction.name,
                    instruction.operator.kind(),
                    instruction.inputs,
                    instruction.outputs
                );
            }
        }

        let (handle, cancel) = Cancellation::new();
        let group = TaskGroup::new(handle);
        let mut endpoints = self.link_chain(&cancel);

        thread::scope(|s| {
            let first = &instructions[0];
            if let (Arity::Chain, Some(location)) = (first.input_arity(), first.inputs.first()) {
                let (writer, reader) = self.options.piper(EdgeFormat::Rows, &cancel).split();
                endpoints[0].input = Some(reader);
                self.spawn_dial_read(s, &group, first, location, writer);
            }

            let last = &instructions[instructions.len() - 1];
            if let (Arity::Chain, Some(location)) = (last.output_arity(), last.outputs.first()) {
                let (writer, reader) = self.options.piper(EdgeFormat::Rows, &cancel).split();
                endpoints[instructions.len() - 1].output = Some(writer);
                self.spawn_dial_write(s, &group, last, location, reader, self.instruction_set.reader_count);
            }

            for (instruction, mut ends) in instructions.iter().zip(endpoints.into_iter()) {
                if instruction.input_arity() == Arity::Dialed {
                    ends.inputs = self.link_in_readers(s, &group, instruction, &cancel);
                }
                if instruction.output_arity() == Arity::Dialed {
                    ends.outputs = self.process_writers(s, &group, instruction, &cancel);
                }
                group.spawn(s, instruction.name.clone(), move || {
                    info!("{} started", instruction.name);
                    self.execute_instruction(instruction, ends)?;
                    info!("{} finished", instruction.name);
                    Ok(())
                });
            }
        });

        let failed = group.failed();
        let result = group.into_result();
        match result {
            Ok(()) => info!("{} finished all instructions", name),
            Err(ref e) => error!("{} failed with {} failing tasks: {}", name, failed, e),
        }
        result
    }

    // One pipe per consecutive pair of instructions, in the edge's format.
    fn link_chain(&self, cancel: &Cancellation) -> Vec<Endpoints> {
        let instructions = &self.instruction_set.instructions;
        let mut endpoints: Vec<Endpoints> = instructions.iter().map(|_| Endpoints::default()).collect();
        for i in 1..instructions.len() {
            let format = edge_format(&instructions[i - 1].operator, &instructions[i].operator);
            let (writer, reader) = self.options.piper(format, cancel).split();
            endpoints[i - 1].output = Some(writer);
            endpoints[i].input = Some(reader);
        }
        endpoints
    }

    // Every declared input is dialed separately, so two inputs naming the
    // same shard are read as independent streams.
    fn link_in_readers<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        group: &TaskGroup,
        instruction: &'env Instruction,
        cancel: &Cancellation,
    ) -> Vec<PipeReader> {
        instruction
            .inputs
            .iter()
            .map(|location| {
                let (writer, reader) = self.options.piper(EdgeFormat::Rows, cancel).split();
                self.spawn_dial_read(s, group, instruction, location, writer);
                reader
            })
            .collect()
    }

    fn process_writers<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        group: &TaskGroup,
        instruction: &'env Instruction,
        cancel: &Cancellation,
    ) -> Vec<PipeWriter> {
        instruction
            .outputs
            .iter()
            .map(|location| {
                let (writer, reader) = self.options.piper(EdgeFormat::Rows, cancel).split();
                self.spawn_dial_write(s, group, instruction, location, reader, 1);
                writer
            })
            .collect()
    }

    fn spawn_dial_read<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        group: &TaskGroup,
        instruction: &Instruction,
        location: &'env ShardLocation,
        writer: PipeWriter,
    ) {
        let task = format!("{}<-{}", instruction.name, location);
        group.spawn(s, task, move || {
            dial_read_channel(&self.options.name, location, writer, &self.options)
        });
    }

    fn spawn_dial_write<'scope, 'env>(
        &'env self,
        s: &'scope Scope<'scope, 'env>,
        group: &TaskGroup,
        instruction: &Instruction,
        location: &'env ShardLocation,
        reader: PipeReader,
        reader_count: usize,
    ) {
        let task = format!("{}->{}", instruction.name, location);
        group.spawn(s, task, move || {
            dial_write_channel(&self.options.name, location, reader, reader_count, &self.options)
        });
    }

    fn execute_instruction(&self, instruction: &Instruction, ends: Endpoints) -> Result<()> {
        let Endpoints { input, output, inputs, outputs } = ends;
        let budget = self.options.merge_memory_bytes();

        match instruction.operator {
            Operator::Pipe(ref command) => script::run_command(&instruction.name, command, input, output),
            Operator::LocalSort { ref order_bys } => sort::local_sort(
                require(input, instruction, "input")?,
                require(output, instruction, "output")?,
                &Comparator::new(order_bys),
            ),
            Operator::PipeAsArgs { ref code } => {
                let output = require(output, instruction, "output")?;
                let format = output.format();
                script::pipe_as_args(require(input, instruction, "input")?, output, code, format)
            }
            Operator::MergeSortedTo { ref order_bys } => {
                let outputs = match output {
                    Some(output) => vec![output],
                    None => outputs,
                };
                merge::merge_sorted_to(inputs, outputs, &Comparator::new(order_bys), budget)
            }
            Operator::ScatterPartitions { ref indexes } => {
                partition::scatter_partitions(require(input, instruction, "input")?, outputs, indexes)
            }
            Operator::RoundRobin => partition::round_robin(require(input, instruction, "input")?, outputs),
            Operator::CollectPartitions => {
                partition::collect_partitions(inputs, require(output, instruction, "output")?)
            }
            Operator::InputSplitReader { input_type } => split::input_split_reader(
                require(input, instruction, "input")?,
                require(output, instruction, "output")?,
                input_type,
            ),
            Operator::JoinPartitionedSorted {
                ref indexes,
                left_outer,
                right_outer,
            } => {
                let (left, right) = two(inputs, instruction)?;
                join::join_partitioned_sorted(
                    left,
                    right,
                    require(output, instruction, "output")?,
                    indexes,
                    left_outer,
                    right_outer,
                )
            }
            Operator::CoGroupPartitionedSorted { ref indexes } => {
                let (left, right) = two(inputs, instruction)?;
                join::cogroup_partitioned_sorted(left, right, require(output, instruction, "output")?, indexes)
            }
            Operator::LocalTop { n, ref order_bys } => sort::local_top(
                require(input, instruction, "input")?,
                require(output, instruction, "output")?,
                n,
                &Comparator::new(order_bys),
            ),
            Operator::Broadcast => partition::broadcast(require(input, instruction, "input")?, outputs),
            Operator::LocalHashAndJoinWith { ref indexes } => {
                let (left, right) = two(inputs, instruction)?;
                join::local_hash_and_join_with(left, right, require(output, instruction, "output")?, indexes)
            }
        }
    }
}
