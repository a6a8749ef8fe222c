//! In-memory `ShellTransport` for tests.
//!
//! Replies are scripted per exact command line. Everything the manager does
//! (connects, commands, closes) is recorded so tests can assert on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::catalog::{CONNECTION_TEST_COMMAND, ENCLOSURE_PROBE_COMMAND};
use crate::error::ShellError;
use crate::ssh::{ShellOutput, ShellSession, ShellTransport, SshTarget};

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail { code: u32, stderr: String },
    Err(ShellError),
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Ok(stdout.into())
    }

    pub fn fail(code: u32, stderr: impl Into<String>) -> Self {
        Reply::Fail {
            code,
            stderr: stderr.into(),
        }
    }

    fn into_result(self) -> Result<ShellOutput, ShellError> {
        match self {
            Reply::Ok(stdout) => Ok(ShellOutput {
                exit_status: Some(0),
                stdout,
                stderr: String::new(),
            }),
            Reply::Fail { code, stderr } => Ok(ShellOutput {
                exit_status: Some(code),
                stdout: String::new(),
                stderr,
            }),
            Reply::Err(e) => Err(e),
        }
    }
}

#[derive(Debug)]
struct Script {
    connect_error: Option<ShellError>,
    replies: HashMap<String, Reply>,
    default_reply: Reply,
    delay: Duration,
    close_fails: bool,
    /// Sessions with a serial at or below this are dead
    severed_through: usize,
    connects: usize,
    closes: usize,
    executed: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect_error: None,
            replies: HashMap::new(),
            default_reply: Reply::fail(127, "command not found"),
            delay: Duration::ZERO,
            close_fails: false,
            severed_through: 0,
            connects: 0,
            closes: 0,
            executed: Vec::new(),
            in_flight: 0,
            max_in_flight: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A NAS without a QM2 card: the connection test passes, the probe fails.
    pub fn nas() -> Self {
        Self::new()
            .reply(CONNECTION_TEST_COMMAND, Reply::ok("Connection test"))
            .reply(ENCLOSURE_PROBE_COMMAND, Reply::fail(127, "hal_app: not found"))
    }

    /// A NAS with a QM2 card at `enc_sys_id`.
    pub fn nas_with_qm2(enc_sys_id: &str) -> Self {
        Self::new()
            .reply(CONNECTION_TEST_COMMAND, Reply::ok("Connection test"))
            .reply(
                ENCLOSURE_PROBE_COMMAND,
                Reply::ok(format!(
                    "0  SYSTEM  root  TS-h973AX\n1  QM2  {enc_sys_id}  QM2-2P10G1TB"
                )),
            )
    }

    pub fn reply(self, command: &str, reply: Reply) -> Self {
        self.lock().replies.insert(command.to_string(), reply);
        self
    }

    pub fn fail_connect_with(self, error: ShellError) -> Self {
        self.lock().connect_error = Some(error);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    pub fn close_fails(self) -> Self {
        self.lock().close_fails = true;
        self
    }

    /// Kill every session opened so far, as if the peer went away.
    pub fn sever(&self) {
        let mut script = self.lock();
        script.severed_through = script.connects;
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

impl ShellTransport for ScriptedTransport {
    type Session = ScriptedSession;

    async fn connect(&self, _target: &SshTarget, _timeout: Duration) -> Result<ScriptedSession, ShellError> {
        let mut script = self.lock();
        if let Some(error) = script.connect_error.clone() {
            return Err(error);
        }
        script.connects += 1;
        Ok(ScriptedSession {
            script: self.script.clone(),
            serial: script.connects,
            closed: false,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedSession {
    script: Arc<Mutex<Script>>,
    serial: usize,
    closed: bool,
}

impl ScriptedSession {
    fn severed(&self) -> bool {
        self.serial <= self.script.lock().unwrap().severed_through
    }
}

impl ShellSession for ScriptedSession {
    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<ShellOutput, ShellError> {
        if self.closed {
            return Err(ShellError::NotConnected);
        }
        if self.severed() {
            return Err(ShellError::Transport("connection reset by peer".into()));
        }

        let (delay, reply) = {
            let mut script = self.script.lock().unwrap();
            script.executed.push(command.to_string());
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
            let reply = script
                .replies
                .get(command)
                .cloned()
                .unwrap_or_else(|| script.default_reply.clone());
            (script.delay, reply)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.script.lock().unwrap().in_flight -= 1;
        reply.into_result()
    }

    async fn close(&mut self) -> Result<(), ShellError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut script = self.script.lock().unwrap();
        script.closes += 1;
        if script.close_fails {
            return Err(ShellError::Transport("close failed".into()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || self.severed()
    }
}
