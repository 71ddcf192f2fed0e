//! Sandbox runner: the child-process half of the grading executor.
//!
//! Reads one `ExecutionRequest` line on stdin, answers with a `ready`
//! envelope, builds the page from the markup and style channels, runs
//! the script channel, then evaluates the battery, streaming every log
//! and test result on stdout as it happens. Resource limits come from
//! the parent process; this binary only renders and reports.

use std::io::{self, BufRead, Write};

use grader::engine::ExecutionContext;
use grader::evaluator::evaluate_battery;
use grader::model::{TestBattery, TestCase, TestOutcome};
use grader::protocol::{
    Envelope, ExecutionRequest, FatalPayload, LogPayload, MessageBody, ReadyPayload,
    TestResultPayload,
};

fn main() {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        std::process::exit(1);
    }

    let request: ExecutionRequest = match serde_json::from_str(&line) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("bad execution request: {}", e);
            std::process::exit(1);
        }
    };

    run(request);
}

fn run(request: ExecutionRequest) {
    let id = request.correlation_id;
    emit(id, MessageBody::Ready(ReadyPayload {}));

    let mut ctx = ExecutionContext::prepare(&request.markup, &request.style);
    ctx.set_log_hook(Box::new(move |level, text| {
        emit(
            id,
            MessageBody::Log(LogPayload {
                level,
                text: text.to_string(),
            }),
        );
    }));

    if let Err(fault) = ctx.run_script(&request.script) {
        emit(
            id,
            MessageBody::Fatal(FatalPayload {
                message: fault.message,
            }),
        );
        return;
    }

    // Battery identity stays host-side; only the tests cross the wire.
    let tests = request
        .tests
        .into_iter()
        .map(|t| TestCase::new(t.name, t.assertion))
        .collect();
    let battery = TestBattery::new("", 0, tests);

    evaluate_battery(&mut ctx, &battery, |index, outcome| {
        emit(
            id,
            MessageBody::TestResult(TestResultPayload {
                index,
                name: outcome.name.clone(),
                passed: outcome.passed,
                message: wire_message(outcome),
            }),
        );
    });
}

/// Fold the captured value into the message so it survives the wire.
fn wire_message(outcome: &TestOutcome) -> String {
    match &outcome.captured_value {
        Some(value) => format!("{} (got {})", outcome.message, value),
        None => outcome.message.clone(),
    }
}

/// Write one envelope line and flush, so a mid-run kill loses nothing
/// already emitted.
fn emit(correlation_id: u64, body: MessageBody) {
    let envelope = Envelope::new(correlation_id, body);
    let Ok(line) = serde_json::to_string(&envelope) else {
        return;
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{}", line);
    let _ = out.flush();
}
