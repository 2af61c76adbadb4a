use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Scope};

use sluice::pipe::CancelHandle;
use sluice::{Error, Result};

#[derive(Debug, Default)]
struct Failures {
    // The error that started the shutdown
    primary: Option<Error>,
    // Fallout of a shutdown: cancellation or a consumer going away
    secondary: Option<Error>,
}

#[derive(Debug)]
struct GroupState {
    failures: Mutex<Failures>,
    failed: AtomicUsize,
    finished: AtomicUsize,
    cancel: CancelHandle,
}

fn is_fallout(e: &Error) -> bool {
    if e.is_cancelled() {
        return true;
    }
    match e {
        Error::Instruction { source, .. } => is_fallout(source),
        Error::Io(io) => io.kind() == io::ErrorKind::BrokenPipe,
        _ => false,
    }
}

impl GroupState {
    fn fail(&self, name: &str, e: Error) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let fallout = is_fallout(&e);
        if fallout {
            debug!("{} stopped: {}", name, e);
        } else {
            error!("{} failed: {}", name, e);
        }

        let tagged = Error::Instruction {
            instruction: name.to_owned(),
            source: Box::new(e),
        };
        if let Ok(mut failures) = self.failures.lock() {
            let slot = if fallout { &mut failures.secondary } else { &mut failures.primary };
            if slot.is_none() {
                *slot = Some(tagged);
            }
        }
        self.cancel.cancel();
    }
}

/// Tracks a set of concurrently running tasks.  The first failure cancels
/// every sibling; `into_result` reports it once all tasks have been joined.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    state: Arc<GroupState>,
}

impl TaskGroup {
    /// Creates a group that fires `cancel` on the first failure.
    pub fn new(cancel: CancelHandle) -> Self {
        TaskGroup {
            state: Arc::new(GroupState {
                failures: Mutex::new(Failures::default()),
                failed: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                cancel: cancel,
            }),
        }
    }

    /// Runs `f` on its own thread inside `scope`.
    pub fn spawn<'scope, 'env, F>(&self, scope: &'scope Scope<'scope, 'env>, name: String, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'scope,
    {
        let state = self.state.clone();
        let task_name = name.clone();
        let spawned = thread::Builder::new().name(name.clone()).spawn_scoped(scope, move || {
            trace!("{} started", task_name);
            let outcome = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, "task panicked"))),
            };
            match outcome {
                Ok(()) => trace!("{} finished", task_name),
                Err(e) => state.fail(&task_name, e),
            }
            state.finished.fetch_add(1, Ordering::SeqCst);
        });

        if let Err(e) = spawned {
            self.state.fail(&name, Error::Io(e));
        }
    }

    /// Number of tasks that have run to completion, successful or not
    pub fn finished(&self) -> usize {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// Number of tasks that have failed
    pub fn failed(&self) -> usize {
        self.state.failed.load(Ordering::SeqCst)
    }

    /// The first error reported by any task.  Call after the scope has joined.
    pub fn into_result(self) -> Result<()> {
        let mut failures = match self.state.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        };
        match failures.primary.take().or_else(|| failures.secondary.take()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test_task {
    use super::*;
    use std::io::{Read, Write};

    use sluice::pipe::{Cancellation, EdgeFormat, Piper};

    #[test]
    fn test_all_succeed() {
        let (handle, cancel) = Cancellation::new();
        let group = TaskGroup::new(handle);
        thread::scope(|s| {
            for i in 0..4 {
                group.spawn(s, format!("task-{}", i), || Ok(()));
            }
        });
        assert_eq!(group.finished(), 4);
        assert!(!cancel.is_cancelled());
        assert!(group.into_result().is_ok());
    }

    #[test]
    fn test_failure_cancels_blocked_sibling() {
        let (handle, cancel) = Cancellation::new();
        let group = TaskGroup::new(handle);
        // Nobody reads this pipe, so the writer blocks once it is full
        let (mut writer, reader) = Piper::new(1, 1, EdgeFormat::Rows, &cancel).split();

        thread::scope(|s| {
            group.spawn(s, "producer".into(), move || {
                loop {
                    writer.write_all(b"x")?;
                }
            });
            group.spawn(s, "consumer".into(), move || {
                let _reader = reader;
                Err(Error::config("consumer", "refusing to read"))
            });
        });

        assert_eq!(group.failed(), 2);
        match group.into_result() {
            Err(Error::Instruction { instruction, source }) => {
                assert_eq!(instruction, "consumer");
                match *source {
                    Error::Config { .. } => {}
                    ref e => panic!("unexpected {:?}", e),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_panic_is_reported() {
        let (handle, cancel) = Cancellation::new();
        let group = TaskGroup::new(handle);
        let (_writer, mut reader) = Piper::new(1, 1, EdgeFormat::Rows, &cancel).split();
        thread::scope(|s| {
            group.spawn(s, "boom".into(), || panic!("boom"));
            group.spawn(s, "waiting".into(), move || {
                let mut buf = [0u8; 1];
                reader.read(&mut buf)?;
                Ok(())
            });
        });
        let err = group.into_result().unwrap_err();
        assert!(!err.is_cancelled());
    }
}
