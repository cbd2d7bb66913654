//! Abstraction over external command execution for testability.
//!
//! Every tool the bootstrap drives (dnf, rpm, db_dump, db_load, the python
//! interpreter used for macro evaluation) goes through the [`CommandRunner`]
//! trait, stored as `Arc<dyn CommandRunner>` in the session.
//!
//! # Production Usage
//!
//! [`RealCommandRunner`] delegates to [`std::process::Command`]. Commands with
//! [`CommandOptions::chroot`] set are jailed with `chroot(2)` in the child
//! before `exec`, so `PATH` lookup happens inside the guest tree.
//!
//! # Testing Usage
//!
//! [`MockCommandRunner`] records all calls and returns canned responses, enabling
//! fast, deterministic unit tests without root privileges or RPM tooling.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

/// Trait for abstracting external command execution.
pub trait CommandRunner: Send + Sync {
    /// Run a command and capture its full output (stdout + stderr + exit status).
    fn run_output(&self, program: &str, args: &[&str], options: &CommandOptions) -> io::Result<Output>;

    /// Run a command and return only its exit status (inherits stdio).
    ///
    /// Used for dnf, whose progress output belongs to the operator.
    fn run_status(&self, program: &str, args: &[&str], options: &CommandOptions) -> io::Result<ExitStatus>;

    /// Run `producer` and `consumer` concurrently with the producer's stdout
    /// connected to the consumer's stdin.
    ///
    /// Returns once the pipe is drained, the consumer's stdin is closed and
    /// both processes have exited.
    fn run_piped(&self, producer: &Invocation<'_>, consumer: &Invocation<'_>) -> io::Result<PipedOutput>;
}

/// Options for command execution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOptions {
    /// Directory to use as the root filesystem of the child.
    pub chroot: Option<PathBuf>,
    /// Additional environment variables.
    pub env: Vec<(String, String)>,
}

impl CommandOptions {
    /// Create options that run the command on the host with extra environment.
    pub fn host(env: &[(String, String)]) -> Self {
        Self {
            chroot: None,
            env: env.to_vec(),
        }
    }

    /// Create options that jail the command under `root`.
    pub fn in_chroot(root: impl Into<PathBuf>, env: &[(String, String)]) -> Self {
        Self {
            chroot: Some(root.into()),
            env: env.to_vec(),
        }
    }
}

/// A borrowed command line, one end of a [`CommandRunner::run_piped`] call.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub program: &'a str,
    pub args: &'a [&'a str],
    pub options: &'a CommandOptions,
}

impl<'a> Invocation<'a> {
    pub fn new(program: &'a str, args: &'a [&'a str], options: &'a CommandOptions) -> Self {
        Self {
            program,
            args,
            options,
        }
    }

    /// Shell-quoted rendering for logs and error messages.
    pub fn display(&self) -> String {
        display_command(self.program, self.args)
    }
}

/// Captured results of both ends of a pipe.
///
/// The producer's `stdout` is always empty; its bytes went to the consumer.
#[derive(Debug, Clone)]
pub struct PipedOutput {
    pub producer: Output,
    pub consumer: Output,
}

/// Render a command line the way a shell user would type it.
pub fn display_command(program: &str, args: &[&str]) -> String {
    let words = std::iter::once(program).chain(args.iter().copied());
    shlex::try_join(words).unwrap_or_else(|_| {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    })
}

/// Production implementation that delegates to [`std::process::Command`].
pub struct RealCommandRunner;

impl RealCommandRunner {
    fn command(program: &str, args: &[&str], options: &CommandOptions) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        for (k, v) in &options.env {
            cmd.env(k, v);
        }
        if let Some(root) = options.chroot.clone() {
            // SAFETY: the hook only issues chroot(2) and chdir(2), both
            // async-signal-safe, between fork and exec.
            unsafe {
                cmd.pre_exec(move || {
                    nix::unistd::chroot(root.as_path())?;
                    nix::unistd::chdir("/")?;
                    Ok(())
                });
            }
        }
        cmd
    }
}

impl CommandRunner for RealCommandRunner {
    fn run_output(&self, program: &str, args: &[&str], options: &CommandOptions) -> io::Result<Output> {
        Self::command(program, args, options).output()
    }

    fn run_status(&self, program: &str, args: &[&str], options: &CommandOptions) -> io::Result<ExitStatus> {
        Self::command(program, args, options).status()
    }

    fn run_piped(&self, producer: &Invocation<'_>, consumer: &Invocation<'_>) -> io::Result<PipedOutput> {
        let mut source = Self::command(producer.program, producer.args, producer.options)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut sink = match Self::command(consumer.program, consumer.args, consumer.options)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = source.kill();
                let _ = source.wait();
                return Err(e);
            }
        };

        // Side pipes are read concurrently so a chatty child can't fill its
        // pipe buffer and stall the copy.
        let source_stderr = drain(source.stderr.take());
        let sink_stdout = drain(sink.stdout.take());
        let sink_stderr = drain(sink.stderr.take());

        let mut reader = source
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("producer stdout is not captured"))?;
        let mut writer = sink
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("consumer stdin is not captured"))?;

        let copied = io::copy(&mut reader, &mut writer);
        // Closing our end of both pipes lets the consumer see EOF and
        // unblocks a producer stuck on a dead consumer.
        drop(writer);
        drop(reader);

        let producer_status = source.wait()?;
        let consumer_status = sink.wait()?;
        let producer_output = Output {
            status: producer_status,
            stdout: Vec::new(),
            stderr: join(source_stderr)?,
        };
        let consumer_output = Output {
            status: consumer_status,
            stdout: join(sink_stdout)?,
            stderr: join(sink_stderr)?,
        };

        match copied {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe && !consumer_output.status.success() => {}
            Err(e) => return Err(e),
        }

        Ok(PipedOutput {
            producer: producer_output,
            consumer: consumer_output,
        })
    }
}

/// Read `pipe` to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join(handle: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| io::Error::other("pipe reader thread panicked"))?
}

/// A call recorded by [`MockCommandRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub options: CommandOptions,
    /// Bytes delivered on stdin (only for the consumer side of a pipe).
    pub stdin: Vec<u8>,
}

/// Canned result for one invocation of a program.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl MockResponse {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn fail(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    fn output(&self) -> Output {
        Output {
            status: ExitStatus::from_raw(self.code << 8),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

type Effect = Box<dyn Fn(&RecordedCall) + Send + Sync>;

/// Test implementation that records calls and replays queued responses.
///
/// Responses are queued per program name; a program with an empty queue
/// succeeds with no output. Effects registered with [`MockCommandRunner::on_run`]
/// fire before the response is returned, which lets a test emulate the
/// filesystem side of a tool (e.g. `db_load` creating its output file).
#[derive(Default)]
pub struct MockCommandRunner {
    calls: Mutex<Vec<RecordedCall>>,
    responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    effects: Mutex<HashMap<String, Effect>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call of `program`.
    pub fn respond(&self, program: &str, response: MockResponse) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(program.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Drop every queued response for `program`.
    pub fn reset(&self, program: &str) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(program);
        self
    }

    /// Run `effect` every time `program` is invoked.
    pub fn on_run(&self, program: &str, effect: impl Fn(&RecordedCall) + Send + Sync + 'static) -> &Self {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(program.to_string(), Box::new(effect));
        self
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Calls made to `program`, in order.
    pub fn calls_to(&self, program: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    fn record(&self, program: &str, args: &[&str], options: &CommandOptions, stdin: Vec<u8>) -> Output {
        let call = RecordedCall {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            options: options.clone(),
            stdin,
        };
        if let Some(effect) = self
            .effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(program)
        {
            effect(&call);
        }
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);

        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(program)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default()
            .output()
    }
}

impl CommandRunner for MockCommandRunner {
    fn run_output(&self, program: &str, args: &[&str], options: &CommandOptions) -> io::Result<Output> {
        Ok(self.record(program, args, options, Vec::new()))
    }

    fn run_status(&self, program: &str, args: &[&str], options: &CommandOptions) -> io::Result<ExitStatus> {
        Ok(self.record(program, args, options, Vec::new()).status)
    }

    fn run_piped(&self, producer: &Invocation<'_>, consumer: &Invocation<'_>) -> io::Result<PipedOutput> {
        let mut produced = self.record(producer.program, producer.args, producer.options, Vec::new());
        let piped = std::mem::take(&mut produced.stdout);
        let consumed = self.record(consumer.program, consumer.args, consumer.options, piped);
        Ok(PipedOutput {
            producer: produced,
            consumer: consumed,
        })
    }
}
