//! Host loading lifecycle.

use serde::Serialize;
use thiserror::Error;

/// Loading progress of a sketch host. Moves strictly forward one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LoadingState {
    #[serde(rename = "not_started")]
    NotStarted,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "scriptsLoaded")]
    ScriptsLoaded,
    #[serde(rename = "userCodeLoaded")]
    UserCodeLoaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid loading transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: LoadingState,
    pub to: LoadingState,
}

impl LoadingState {
    /// Wire name used by the surrounding application.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingState::NotStarted => "not_started",
            LoadingState::Started => "started",
            LoadingState::ScriptsLoaded => "scriptsLoaded",
            LoadingState::UserCodeLoaded => "userCodeLoaded",
        }
    }

    /// The only state reachable from this one.
    pub fn successor(&self) -> Option<LoadingState> {
        match self {
            LoadingState::NotStarted => Some(LoadingState::Started),
            LoadingState::Started => Some(LoadingState::ScriptsLoaded),
            LoadingState::ScriptsLoaded => Some(LoadingState::UserCodeLoaded),
            LoadingState::UserCodeLoaded => None,
        }
    }

    /// Move to `next` if it is the immediate successor.
    pub fn advance(&mut self, next: LoadingState) -> Result<(), TransitionError> {
        if self.successor() != Some(next) {
            return Err(TransitionError { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    pub fn is_at_least(&self, other: LoadingState) -> bool {
        *self >= other
    }
}

impl std::fmt::Display for LoadingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain() {
        let mut state = LoadingState::NotStarted;
        state.advance(LoadingState::Started).unwrap();
        state.advance(LoadingState::ScriptsLoaded).unwrap();
        state.advance(LoadingState::UserCodeLoaded).unwrap();
        assert_eq!(state, LoadingState::UserCodeLoaded);
        assert_eq!(state.successor(), None);
    }

    #[test]
    fn test_rejects_skip_and_backward() {
        let mut state = LoadingState::Started;
        assert!(state.advance(LoadingState::UserCodeLoaded).is_err());
        assert_eq!(state, LoadingState::Started);

        let mut state = LoadingState::UserCodeLoaded;
        let err = state.advance(LoadingState::ScriptsLoaded).unwrap_err();
        assert_eq!(err.from, LoadingState::UserCodeLoaded);
        assert_eq!(state, LoadingState::UserCodeLoaded);
    }

    #[test]
    fn test_rejects_repeat() {
        let mut state = LoadingState::ScriptsLoaded;
        assert!(state.advance(LoadingState::ScriptsLoaded).is_err());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&LoadingState::ScriptsLoaded).unwrap(),
            "\"scriptsLoaded\""
        );
        assert_eq!(LoadingState::NotStarted.to_string(), "not_started");
        assert!(LoadingState::UserCodeLoaded.is_at_least(LoadingState::Started));
        assert!(!LoadingState::Started.is_at_least(LoadingState::ScriptsLoaded));
    }
}
