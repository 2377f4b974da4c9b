//! Thin wrapper around [`tokio::process::Command`] for the external binaries
//! skiff drives: the container runtime CLI, the ssh client and ssh-keygen.

use std::ffi::OsStr;
use std::fmt::Display;
use std::process::{Output, Stdio};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command as BaseCommand};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn command: {command}")]
    Spawn {
        command: String,
        #[source]
        error: tokio::io::Error,
    },

    #[error("failed to write to stdin of command: {command}")]
    Stdin {
        command: String,
        #[source]
        error: tokio::io::Error,
    },

    #[error("command failed: {command}\n{stderr}")]
    Failure { command: String, stderr: String },
}

/// A single external process invocation.
///
/// Output is captured by default; [`Command::input`] feeds bytes to the
/// child's stdin, [`Command::interactive`] hands the caller's stdin/stdout to
/// the child (keeping stderr piped so it can be filtered).
#[derive(Debug)]
pub struct Command {
    cmd: BaseCommand,
    input: Option<Vec<u8>>,
    interactive: bool,
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cmd = self.cmd.as_std();
        let program = cmd.get_program().to_string_lossy();
        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if args.is_empty() {
            write!(f, "{program}")
        } else {
            write!(f, "{program} {args}")
        }
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            cmd: BaseCommand::new(program),
            input: None,
            interactive: false,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    /// Bytes to write to the child's stdin before waiting for it.
    pub fn input(&mut self, input: Vec<u8>) -> &mut Self {
        self.input = Some(input);
        self
    }

    /// Inherit the caller's stdin/stdout. Stderr stays piped.
    pub fn interactive(&mut self) -> &mut Self {
        self.interactive = true;
        self
    }

    /// Spawn without waiting. Stderr is always piped.
    pub fn spawn(&mut self) -> Result<Child, CommandError> {
        let (stdin, stdout) = if self.interactive {
            (Stdio::inherit(), Stdio::inherit())
        } else if self.input.is_some() {
            (Stdio::piped(), Stdio::piped())
        } else {
            (Stdio::null(), Stdio::piped())
        };
        self.cmd
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| CommandError::Spawn {
                command: self.to_string(),
                error,
            })
    }

    /// Run to completion, capturing output. Exit status is not checked.
    pub async fn output(&mut self) -> Result<Output, CommandError> {
        let input = self.input.take();
        let mut child = self.spawn()?;

        if let Some(input) = input {
            let mut stdin = child.stdin.take().ok_or_else(|| CommandError::Stdin {
                command: self.to_string(),
                error: std::io::Error::other("stdin was not captured"),
            })?;
            stdin
                .write_all(&input)
                .await
                .map_err(|error| CommandError::Stdin {
                    command: self.to_string(),
                    error,
                })?;
            // Dropping stdin closes the pipe so the child sees EOF.
            drop(stdin);
        }

        child
            .wait_with_output()
            .await
            .map_err(|error| CommandError::Spawn {
                command: self.to_string(),
                error,
            })
    }

    /// Run to completion, failing on a non-zero exit status.
    pub async fn run(&mut self) -> Result<Output, CommandError> {
        let out = self.output().await?;
        if out.status.success() {
            Ok(out)
        } else {
            Err(CommandError::Failure {
                command: self.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            })
        }
    }

    /// Run to completion and return trimmed stdout, failing on non-zero exit.
    pub async fn run_text(&mut self) -> Result<String, CommandError> {
        let out = self.run().await?;
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Run to completion and report only whether the exit status was zero.
    pub async fn succeeds(&mut self) -> Result<bool, CommandError> {
        let out = self.output().await?;
        Ok(out.status.success())
    }
}
