//! Sandboxed page engine
//!
//! Everything that runs inside the sandbox process: the markup parser,
//! the style sheet, and the script interpreter, glued together by
//! `ExecutionContext`. The engine handles:
//! - building the document tree from the markup channel
//! - resolving styles from the style channel plus inline attributes
//! - running the script channel and, later, the battery's assertions
//!   against the same mutated document and variable scope
//!
//! It does NOT:
//! - touch the filesystem, network, or clock
//! - enforce time or memory budgets (the host process does that)

pub mod dom;
pub mod markup;
pub mod script;
pub mod style;

use crate::model::{LogLevel, LogLine};

use self::dom::Document;
use self::script::{Fault, Scope, Value};
use self::style::StyleSheet;

/// Receives log lines as the script emits them.
pub type LogHook = Box<dyn FnMut(LogLevel, &str) + Send>;

/// Shared state for one sandbox run: the parsed document, the parsed
/// style sheet, and the script's variable scope.
pub struct ExecutionContext {
    pub document: Document,
    pub sheet: StyleSheet,
    pub vars: Scope,
    logs: Vec<LogLine>,
    hook: Option<LogHook>,
}

impl ExecutionContext {
    /// Parse the markup and style channels. Both parsers are lenient and
    /// never fail; preparing a context always succeeds.
    pub fn prepare(markup: &str, style: &str) -> Self {
        Self {
            document: markup::parse_markup(markup),
            sheet: style::parse_style(style),
            vars: Scope::new(),
            logs: Vec::new(),
            hook: None,
        }
    }

    /// Stream log lines to `hook` instead of buffering them. The sandbox
    /// runner uses this to forward logs as protocol messages immediately,
    /// so a later kill loses nothing already emitted.
    pub fn set_log_hook(&mut self, hook: LogHook) {
        self.hook = Some(hook);
    }

    pub(crate) fn emit_log(&mut self, level: LogLevel, text: String) {
        match &mut self.hook {
            Some(hook) => hook(level, &text),
            None => self.logs.push(LogLine { level, text }),
        }
    }

    /// Drain the buffered log lines (only populated when no hook is set).
    pub fn take_logs(&mut self) -> Vec<LogLine> {
        std::mem::take(&mut self.logs)
    }

    /// Parse and run the script channel against the document.
    pub fn run_script(&mut self, src: &str) -> Result<(), Fault> {
        let program = script::parse_program(src)?;
        script::run_program(self, &program)
    }

    /// Evaluate one assertion expression. Sees every document mutation
    /// and variable the script left behind.
    pub fn eval_assertion(&mut self, src: &str) -> Result<Value, Fault> {
        let expr = script::parse_expression(src)?;
        script::eval(self, &expr)
    }
}
