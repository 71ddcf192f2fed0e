//! Sandbox message protocol
//!
//! Everything that crosses the host/sandbox boundary is a single line of
//! JSON. The sandbox emits `Envelope`s (ready, log, test-result, fatal)
//! tagged with the correlation id of its run; the host sends exactly one
//! `ExecutionRequest` on the sandbox's stdin.
//!
//! `Session` is the host-side ledger for one run. It enforces the
//! delivery rules: messages with a foreign correlation id are discarded,
//! the first result per test index wins, and nothing lands after the
//! session is finalized.

use serde::{Deserialize, Serialize};

use crate::model::{LogLevel, LogLine, TestBattery, TestOutcome};

/// One protocol message from the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "correlationId")]
    pub correlation_id: u64,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Envelope {
    pub fn new(correlation_id: u64, body: MessageBody) -> Self {
        Self {
            correlation_id,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum MessageBody {
    Ready(ReadyPayload),
    Log(LogPayload),
    TestResult(TestResultPayload),
    Fatal(FatalPayload),
}

/// Handshake payload. Carries nothing; its arrival is the signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: LogLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultPayload {
    pub index: usize,
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatalPayload {
    pub message: String,
}

/// The one message the host writes to the sandbox: the run to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub correlation_id: u64,
    pub markup: String,
    pub style: String,
    pub script: String,
    pub tests: Vec<RequestedTest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedTest {
    pub name: String,
    pub assertion: String,
}

/// Parse one stdout line into an envelope. Blank and malformed lines
/// yield `None`; the caller counts and drops them.
pub fn decode_line(line: &str) -> Option<Envelope> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Retention caps applied while absorbing log messages.
#[derive(Debug, Clone, Copy)]
pub struct SessionCaps {
    pub max_log_lines: usize,
    pub max_log_line_len: usize,
}

impl Default for SessionCaps {
    fn default() -> Self {
        Self {
            max_log_lines: 256,
            max_log_line_len: 4096,
        }
    }
}

/// What `Session::absorb` did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Absorbed {
    Ready,
    Log,
    /// A test slot was filled. `complete` is true when it was the last one.
    Result { index: usize, complete: bool },
    /// The run died; every unresolved slot now carries the fault message.
    Fatal { message: String },
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    ForeignCorrelation,
    AfterFinalize,
    DuplicateIndex,
    IndexOutOfRange,
}

/// Host-side state for one sandbox run.
///
/// Slots are keyed by test index. A slot is written at most once; once
/// every slot is written (or the session is finalized by fault or
/// timeout) all further traffic is discarded.
#[derive(Debug)]
pub struct Session {
    correlation_id: u64,
    test_names: Vec<String>,
    slots: Vec<Option<TestOutcome>>,
    resolved: usize,
    logs: Vec<LogLine>,
    dropped_logs: u32,
    discarded: u32,
    ready: bool,
    finalized: bool,
    caps: SessionCaps,
}

impl Session {
    pub fn new(correlation_id: u64, battery: &TestBattery, caps: SessionCaps) -> Self {
        let test_names: Vec<String> = battery.tests.iter().map(|t| t.name.clone()).collect();
        let slots = vec![None; test_names.len()];
        Self {
            correlation_id,
            test_names,
            slots,
            resolved: 0,
            logs: Vec::new(),
            dropped_logs: 0,
            discarded: 0,
            ready: false,
            finalized: false,
            caps,
        }
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// True once every test slot holds an outcome.
    pub fn is_complete(&self) -> bool {
        self.resolved == self.slots.len()
    }

    pub fn discarded(&self) -> u32 {
        self.discarded
    }

    /// Apply one envelope to the session.
    pub fn absorb(&mut self, envelope: Envelope) -> Absorbed {
        if envelope.correlation_id != self.correlation_id {
            self.discarded += 1;
            return Absorbed::Discarded(DiscardReason::ForeignCorrelation);
        }
        if self.finalized {
            self.discarded += 1;
            return Absorbed::Discarded(DiscardReason::AfterFinalize);
        }

        match envelope.body {
            MessageBody::Ready(_) => {
                self.ready = true;
                Absorbed::Ready
            }
            MessageBody::Log(payload) => {
                self.push_log(payload);
                Absorbed::Log
            }
            MessageBody::TestResult(payload) => {
                if payload.index >= self.slots.len() {
                    self.discarded += 1;
                    return Absorbed::Discarded(DiscardReason::IndexOutOfRange);
                }
                if self.slots[payload.index].is_some() {
                    self.discarded += 1;
                    return Absorbed::Discarded(DiscardReason::DuplicateIndex);
                }
                // The battery is the authority on test names; the payload
                // name is informational only.
                let name = self.test_names[payload.index].clone();
                let outcome = if payload.passed {
                    let mut o = TestOutcome::passed(name);
                    o.message = payload.message;
                    o
                } else {
                    TestOutcome::failed(name, payload.message)
                };
                self.slots[payload.index] = Some(outcome);
                self.resolved += 1;
                let complete = self.is_complete();
                if complete {
                    self.finalized = true;
                }
                Absorbed::Result {
                    index: payload.index,
                    complete,
                }
            }
            MessageBody::Fatal(payload) => {
                self.fail_unresolved(&payload.message);
                Absorbed::Fatal {
                    message: payload.message,
                }
            }
        }
    }

    fn push_log(&mut self, payload: LogPayload) {
        if self.logs.len() >= self.caps.max_log_lines {
            self.dropped_logs += 1;
            return;
        }
        let text = if payload.text.chars().count() > self.caps.max_log_line_len {
            payload.text.chars().take(self.caps.max_log_line_len).collect()
        } else {
            payload.text
        };
        self.logs.push(LogLine {
            level: payload.level,
            text,
        });
    }

    /// Fill every unresolved slot with a failed outcome carrying `message`
    /// and close the session.
    pub fn fail_unresolved(&mut self, message: &str) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(TestOutcome::failed(self.test_names[i].clone(), message));
                self.resolved += 1;
            }
        }
        self.finalized = true;
    }

    /// Deadline path: unresolved slots become failed with message
    /// "timeout" and the session closes.
    pub fn finalize_timeout(&mut self) {
        self.fail_unresolved("timeout");
    }

    /// Consume the session, yielding outcomes in battery order plus the
    /// captured logs and the count of dropped log lines.
    pub fn into_parts(self) -> (Vec<TestOutcome>, Vec<LogLine>, u32) {
        let names = self.test_names;
        let outcomes = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| TestOutcome::failed(names[i].clone(), "unresolved"))
            })
            .collect();
        (outcomes, self.logs, self.dropped_logs)
    }
}
