//! Update-acceptance predicate.
//!
//! Decides whether an incoming props change should re-render the host and run
//! another code-injection cycle. The branches are ordered; each one assumes
//! every earlier branch did not fire.

use serde::{Deserialize, Serialize};

use crate::loading_state::LoadingState;

/// Props handed to the host by the surrounding application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SketchProps {
    pub code: String,
    /// Whether the popup / stream view is open.
    #[serde(default)]
    pub popup_open: bool,
}

impl SketchProps {
    pub fn new(code: impl Into<String>, popup_open: bool) -> Self {
        Self {
            code: code.into(),
            popup_open,
        }
    }
}

/// The part of host state the predicate reads.
#[derive(Debug, Clone, Copy)]
pub struct GateState<'a> {
    pub loading: LoadingState,
    pub last_seen_code: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateVerdict {
    pub accept: bool,
    /// New value for the host's last-seen code, if the predicate stored one.
    pub store_code: Option<String>,
}

impl UpdateVerdict {
    fn accept() -> Self {
        Self {
            accept: true,
            store_code: None,
        }
    }

    fn reject() -> Self {
        Self {
            accept: false,
            store_code: None,
        }
    }
}

pub fn should_update(
    gate: &GateState<'_>,
    current: &SketchProps,
    next: &SketchProps,
) -> UpdateVerdict {
    // Opening the popup always re-renders so the canvas stream gets attached.
    if !current.popup_open && next.popup_open {
        return UpdateVerdict::accept();
    }
    if gate.loading == LoadingState::NotStarted {
        return UpdateVerdict::reject();
    }
    if gate.loading == LoadingState::ScriptsLoaded {
        return UpdateVerdict::accept();
    }
    if next.code != current.code {
        return UpdateVerdict::accept();
    }
    if next.code == gate.last_seen_code && gate.loading == LoadingState::UserCodeLoaded {
        return UpdateVerdict::reject();
    }
    UpdateVerdict {
        accept: true,
        store_code: Some(next.code.clone()),
    }
}
