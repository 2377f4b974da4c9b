//! Remote session establishment.
//!
//! The ssh client is run as a foreground subprocess with the caller's
//! stdin/stdout. Its stderr passes through two chained line filters: the
//! first suppresses the cosmetic known-hosts warning (a consequence of
//! disabling the known-hosts file for ephemeral hosts), the second detects
//! and suppresses the transient "identification exchange reset" signature
//! emitted while the machine's sshd is still coming up. A failed exit that
//! showed the transient signature is retried on a fixed budget; anything
//! else is final.

use std::path::Path;
use std::time::Duration;

use skiff_cmd::Command;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::debug;

use crate::ClusterError;

/// Stderr prefix of the not-yet-ready sshd, e.g.
/// `ssh_exchange_identification: read: Connection reset by peer`.
const TRANSIENT_REFUSAL: &str = "ssh_exchange_identification:";

/// Stderr prefix of the known-hosts notice, e.g.
/// `Warning: Permanently added '[localhost]:2222' (ED25519) to the list of known hosts.`
const KNOWN_HOSTS_NOISE: &str = "Warning: Permanently added ";

const RETRY_ATTEMPTS: u32 = 25;
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Observes stderr lines for a fixed prefix; a matching line is recorded and
/// withheld from the user.
#[derive(Debug)]
pub(crate) struct LineFilter {
    prefix: &'static str,
    matched: bool,
}

impl LineFilter {
    pub(crate) fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            matched: false,
        }
    }

    /// Returns whether the line should be forwarded to the next sink.
    pub(crate) fn observe(&mut self, line: &str) -> bool {
        if line.starts_with(self.prefix) {
            self.matched = true;
            return false;
        }
        true
    }

    pub(crate) fn matched(&self) -> bool {
        self.matched
    }
}

/// Full ssh argument list for one machine: host-key persistence and strict
/// checking are disabled because instances are ephemeral and regenerate
/// their host keys on every re-create.
pub fn ssh_args(
    private_key: &Path,
    port: u16,
    address: &str,
    username: &str,
    remote_args: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "IdentitiesOnly=yes",
    ]
    .map(str::to_owned)
    .into();
    args.push("-i".to_owned());
    args.push(private_key.display().to_string());
    args.push("-p".to_owned());
    args.push(port.to_string());
    args.push("-l".to_owned());
    args.push(username.to_owned());
    args.push(address.to_owned());
    args.extend(remote_args.iter().cloned());
    args
}

struct Attempt {
    success: bool,
    transient: bool,
    command: String,
}

/// One SSH connection policy: which client to run, how often to retry the
/// transient refusal, and how long to wait between attempts.
#[derive(Debug, Clone)]
pub struct SshSession {
    program: String,
    attempts: u32,
    delay: Duration,
}

impl Default for SshSession {
    fn default() -> Self {
        Self::new("ssh", RETRY_ATTEMPTS, RETRY_DELAY)
    }
}

impl SshSession {
    pub fn new(program: impl Into<String>, attempts: u32, delay: Duration) -> Self {
        Self {
            program: program.into(),
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Run the client until it exits with a final outcome: success, a
    /// non-transient failure, or the retry budget exhausted.
    pub async fn connect(&self, args: &[String]) -> Result<(), ClusterError> {
        let mut attempts_left = self.attempts;
        loop {
            let attempt = self.attempt(args).await?;
            if attempt.success {
                return Ok(());
            }
            let err = ClusterError::SshFailed {
                command: attempt.command,
            };
            attempts_left -= 1;
            if !attempt.transient || attempts_left == 0 {
                return Err(err);
            }
            debug!("sshd not ready yet, retrying ({attempts_left} attempts left)");
            sleep(self.delay).await;
        }
    }

    async fn attempt(&self, args: &[String]) -> Result<Attempt, ClusterError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).interactive();
        let command = cmd.to_string();

        let mut child = cmd.spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("ssh stderr was not captured"))?;

        // Known-hosts noise is filtered first; only what it forwards reaches
        // the refusal detector, and only what both forward reaches the user.
        let mut noise = LineFilter::new(KNOWN_HOSTS_NOISE);
        let mut refusal = LineFilter::new(TRANSIENT_REFUSAL);

        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next_line().await? {
            if noise.observe(&line) && refusal.observe(&line) {
                eprintln!("{line}");
            }
        }

        let status = child.wait().await?;
        Ok(Attempt {
            success: status.success(),
            transient: refusal.matched(),
            command,
        })
    }
}
