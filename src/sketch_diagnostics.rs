//! Structured sketch diagnostics.
//!
//! Engine errors (parse + runtime) are wrapped into a stable, JSON-serializable
//! format so the surrounding application can show them without reading logs.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors.
    ParseError,
    /// Runtime errors in sketch or library code.
    RuntimeError,
    /// The sketch used the drawing API incorrectly (missing functions, wrong types).
    HostApiMisuse,
    /// The frame could not fetch or read a script.
    HostError,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    LibraryLoad,
    UserCode,
    Setup,
    Draw,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    /// Id of the script the error came from.
    pub script: String,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Raw engine error string.
    #[serde(default)]
    pub raw: Option<String>,
}

impl ScriptDiagnostic {
    pub fn host_error(phase: ScriptPhase, script: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ScriptDiagnosticKind::HostError,
            phase,
            script: script.to_string(),
            message: message.into(),
            location: None,
            raw: None,
        }
    }
}

impl std::fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(
                f,
                "{} ({}:{}): {}",
                self.script, loc.line, loc.column, self.message
            ),
            None => write!(f, "{}: {}", self.script, self.message),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", allow(dead_code))]
fn classify_message(message: &str) -> ScriptDiagnosticKind {
    let lower = message.to_ascii_lowercase();

    if lower.contains("function not found")
        || lower.contains("variable not found")
        || lower.contains("property not found")
        || lower.contains("mismatched types")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

#[cfg_attr(target_arch = "wasm32", allow(dead_code))]
fn location(line: Option<usize>, column: Option<usize>) -> Option<ScriptLocation> {
    let line = line? as u32;
    if line == 0 {
        return None;
    }
    Some(ScriptLocation {
        line,
        column: (column.unwrap_or(0) as u32).max(1),
    })
}

#[cfg(not(target_arch = "wasm32"))]
pub fn from_parse_error(
    err: &rhai::ParseError,
    phase: ScriptPhase,
    script: &str,
) -> ScriptDiagnostic {
    let raw = err.to_string();
    let pos = err.position();

    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase,
        script: script.to_string(),
        message: err.err_type().to_string(),
        location: location(pos.line(), pos.position()),
        raw: Some(raw),
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn from_eval_error(
    err: &rhai::EvalAltResult,
    phase: ScriptPhase,
    script: &str,
) -> ScriptDiagnostic {
    let raw = err.to_string();
    let pos = err.position();

    ScriptDiagnostic {
        kind: classify_message(&raw),
        phase,
        script: script.to_string(),
        message: raw.clone(),
        location: location(pos.line(), pos.position()),
        raw: Some(raw),
    }
}
