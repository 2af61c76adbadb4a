use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::process::{self, ChildStdin, ChildStdout, Stdio};
use std::thread;

use sluice::frame::{for_each_message, line_to_row, row_to_line, write_row};
use sluice::instruction::Command;
use sluice::pipe::{EdgeFormat, PipeReader, PipeWriter};
use sluice::row::{decode_row, Value};
use sluice::{Error, Result};

fn is_broken_pipe(e: &Error) -> bool {
    match e {
        Error::Io(io) => io.kind() == io::ErrorKind::BrokenPipe,
        _ => false,
    }
}

// Feeds the child's stdin.  A child that stops reading early is not a
// failure; the rest of the input is drained so upstream can finish.
fn feed_stdin(name: &str, mut input: PipeReader, stdin: ChildStdin, to_lines: bool) -> Result<()> {
    let mut stdin = BufWriter::new(stdin);
    let fed = if to_lines {
        for_each_message(&mut input, |data| {
            let row = decode_row(&data)?;
            stdin.write_all(&row_to_line(&row))?;
            Ok(())
        })
    } else {
        io::copy(&mut input, &mut stdin).map(|_| ()).map_err(Error::from)
    };
    let fed = fed.and_then(|_| stdin.flush().map_err(Error::from));

    match fed {
        Err(ref e) if is_broken_pipe(e) => {
            debug!("{} closed its stdin early", name);
            io::copy(&mut input, &mut io::sink())?;
            Ok(())
        }
        other => other,
    }
}

// Copies the child's stdout into `output` until the child closes it.
fn drain_stdout(stdout: ChildStdout, output: &mut PipeWriter, to_rows: bool) -> Result<()> {
    if to_rows {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            write_row(output, &line_to_row(&line))?;
        }
    } else {
        let mut stdout = stdout;
        io::copy(&mut stdout, output)?;
    }
    output.flush()?;
    Ok(())
}

/// Streams `input` through an external process into `output`.
///
/// Without an input the process gets a null stdin; without an output it
/// writes to the executor's own stdout.  A line-oriented process on a row
/// edge has its rows rendered as lines, and its lines parsed back into rows.
/// The output is closed only after the process has exited.
pub fn run_command(
    name: &str,
    command: &Command,
    input: Option<PipeReader>,
    output: Option<PipeWriter>,
) -> Result<()> {
    let command_line = command.command_line();
    let mut child = process::Command::new(&command.path)
        .args(&command.args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(if output.is_some() { Stdio::piped() } else { Stdio::inherit() })
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::Spawn {
            command: command_line.clone(),
            source: e,
        })?;
    debug!("{} started `{}` as pid {}", name, command_line, child.id());

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let mut output = output;

    let streamed = thread::scope(|s| {
        let feeder = match (input, stdin) {
            (Some(input), Some(stdin)) => {
                let to_lines = command.is_pipe && input.format() == EdgeFormat::Rows;
                Some(s.spawn(move || feed_stdin(name, input, stdin, to_lines)))
            }
            _ => None,
        };

        let drained = match (output.as_mut(), stdout) {
            (Some(output), Some(stdout)) => {
                let to_rows = command.is_pipe && output.format() == EdgeFormat::Rows;
                drain_stdout(stdout, output, to_rows)
            }
            _ => Ok(()),
        };
        if drained.is_err() {
            // Unblocks the feeder if the child is still waiting on stdin
            let _ = child.kill();
        }

        let fed = match feeder {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(Error::Io(io::Error::new(io::ErrorKind::Other, "stdin feeder panicked")))),
            None => Ok(()),
        };
        drained.and(fed)
    });

    if streamed.is_err() {
        let _ = child.kill();
    }
    let status = child.wait()?;
    streamed?;
    if !status.success() {
        return Err(Error::Process {
            command: command_line,
            status: status,
        });
    }
    debug!("{} `{}` exited cleanly", name, command_line);

    if let Some(output) = output {
        output.close()?;
    }
    Ok(())
}

fn field_text(v: &Value) -> String {
    match v {
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        other => other.to_string(),
    }
}

/// Fills `$1..$n` in `code` with the fields of `row`.  A placeholder takes
/// every digit after the `$`, so `$1` never eats the front of `$12`.
/// Placeholders beyond the row stay literal, and field text is never scanned
/// for placeholders itself.
pub fn substitute(code: &str, row: &[Value]) -> String {
    let mut line = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(at) = rest.find('$') {
        line.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let digits = after.bytes().take_while(|b| b.is_ascii_digit()).count();
        let field = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| row.get(i));
        match field {
            Some(v) => line.push_str(&field_text(v)),
            None => {
                line.push('$');
                line.push_str(&after[..digits]);
            }
        }
        rest = &after[digits..];
    }
    line.push_str(rest);
    line
}

/// Runs `code` through `sh -c` once per input row with the row's fields
/// substituted, copying each run's stdout to `output` before starting the
/// next.  `format` is the format of the output edge: lines are passed through
/// as-is or parsed into rows.
pub fn pipe_as_args<R: Read, W: Write>(input: R, mut output: W, code: &str, format: EdgeFormat) -> Result<()> {
    let mut runs = 0usize;
    for_each_message(input, |data| {
        let row = decode_row(&data)?;
        let line = substitute(code, &row);
        trace!("Running `{}`", line);

        let out = process::Command::new("sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| Error::Spawn {
                command: line.clone(),
                source: e,
            })?;
        if !out.status.success() {
            return Err(Error::Process {
                command: line,
                status: out.status,
            });
        }

        match format {
            EdgeFormat::Lines => output.write_all(&out.stdout)?,
            EdgeFormat::Rows => {
                for l in out.stdout.split_inclusive(|b| *b == b'\n') {
                    write_row(&mut output, &line_to_row(l))?;
                }
            }
        }
        runs += 1;
        Ok(())
    })?;

    debug!("Ran `{}` for {} rows", code, runs);
    output.flush()?;
    Ok(())
}
