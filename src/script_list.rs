//! Script list compiler.
//!
//! Sketches may declare extra scripts with a legacy one-line declaration:
//!
//! ```text
//! const libs = ["https://cdn.example.com/p5.sound.js", 'lib/noise.js']
//! ```
//!
//! The declaration is pulled out with a single line-oriented pattern match.
//! This is a narrow, best-effort convenience: any variation in the declaration
//! line (extra spaces, a different name, a line prefix longer than one word
//! character) silently yields no scripts instead of an error.
//!
//! The resulting load plan is the drawing library, then the user's persisted
//! scripts, then the sketch-declared scripts. Order is load order and nothing
//! is de-duplicated.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Id of the drawing-library bundle that is always loaded first.
pub const DRAWING_LIBRARY_ID: &str = "p5.js";

/// Bundled location of the drawing library.
pub const DRAWING_LIBRARY_PATH: &str = "lib/p5.min.js";

/// One loadable script resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptRef {
    pub id: String,
    pub path: String,
}

impl ScriptRef {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Sketch-declared scripts use their URL as both id and path.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            path: url,
        }
    }

    /// The drawing-library entry that heads every load plan.
    pub fn drawing_library() -> Self {
        Self::new(DRAWING_LIBRARY_ID, DRAWING_LIBRARY_PATH)
    }
}

/// Ordered scripts to load before user code runs.
pub type LoadPlan = Vec<ScriptRef>;

fn libs_declaration() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\w?(let|const|var) libs = \[(?P<scriptTags>[^\]]*)")
            .expect("libs declaration pattern is valid")
    })
}

/// Extract the URLs of a sketch's `libs = [...]` declaration.
///
/// Only the first declaration counts. Tokens are split on commas and have
/// their quote characters removed; whitespace is kept as written.
pub fn extract_user_scripts(code: &str) -> Vec<String> {
    let Some(captures) = libs_declaration().captures(code) else {
        return Vec::new();
    };
    let group = captures
        .name("scriptTags")
        .map(|m| m.as_str())
        .unwrap_or_default();

    let tokens: Vec<String> = group
        .split(',')
        .map(|token| token.replace(['\'', '"'], ""))
        .collect();

    // `libs = []` and `libs = [""]` both split into a single empty token.
    if tokens.len() == 1 && tokens[0].is_empty() {
        return Vec::new();
    }
    tokens
}

/// Byte range of the `libs = [...]` declaration that
/// [`extract_user_scripts`] reads, including the closing `]` and an optional `;`.
///
/// Frames that cannot execute the declaration as written blank this range out.
pub fn libs_declaration_span(code: &str) -> Option<Range<usize>> {
    let found = libs_declaration().find(code)?;
    let rest = &code[found.end()..];
    let mut end = found.end();
    if rest.starts_with(']') {
        end += 1;
        if rest[1..].starts_with(';') {
            end += 1;
        }
    }
    Some(found.start()..end)
}

/// Merge the drawing library, persisted scripts and sketch-declared scripts.
pub fn compile_script_list(code: &str, persisted: &[ScriptRef]) -> LoadPlan {
    let declared = extract_user_scripts(code);

    let mut plan = Vec::with_capacity(1 + persisted.len() + declared.len());
    plan.push(ScriptRef::drawing_library());
    plan.extend(persisted.iter().cloned());
    plan.extend(declared.into_iter().map(ScriptRef::from_url));
    plan
}

/// Decode a persisted script list from its JSON form.
pub fn parse_persisted_scripts(json: &str) -> anyhow::Result<Vec<ScriptRef>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(json)?)
}
