//! Console for sketches running in the native frame.
//!
//! `print`, `debug` and the `console_*` functions all write here. Each drawn
//! frame gets a fixed message budget; messages over budget are counted and
//! reported once when the next frame begins. The most recent lines are kept so
//! the host can show them next to diagnostics.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use rhai::Dynamic;

/// Messages a sketch may write during one frame.
pub const FRAME_BUDGET: u32 = 100;

/// Lines kept in the console history.
const HISTORY_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub level: ConsoleLevel,
    pub text: String,
    /// Frame counter value when the line was written.
    pub frame: u64,
}

pub struct SketchConsole {
    budget: u32,
    used: Cell<u32>,
    dropped: Cell<u32>,
    frame: Cell<u64>,
    /// Echo lines to stdout/stderr as well as keeping them.
    echo: bool,
    history: RefCell<VecDeque<ConsoleLine>>,
}

impl SketchConsole {
    pub fn new(echo: bool) -> Self {
        Self::with_budget(FRAME_BUDGET, echo)
    }

    pub fn with_budget(budget: u32, echo: bool) -> Self {
        Self {
            budget,
            used: Cell::new(0),
            dropped: Cell::new(0),
            frame: Cell::new(0),
            echo,
            history: RefCell::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    /// Start a new frame's budget. Reports what the previous frame dropped.
    pub fn begin_frame(&self, frame: u64) {
        let dropped = self.dropped.replace(0);
        self.used.set(0);
        if dropped > 0 {
            log::warn!(
                "Sketch wrote {} console messages over its budget of {} in frame {}",
                dropped,
                self.budget,
                self.frame.get()
            );
        }
        self.frame.set(frame);
    }

    /// Write one line. Returns false when the frame's budget is spent.
    pub fn write(&self, level: ConsoleLevel, text: impl Into<String>) -> bool {
        if self.used.get() >= self.budget {
            self.dropped.set(self.dropped.get() + 1);
            return false;
        }
        self.used.set(self.used.get() + 1);

        let line = ConsoleLine {
            level,
            text: text.into(),
            frame: self.frame.get(),
        };
        if self.echo {
            match level {
                ConsoleLevel::Log => println!("{}", line.text),
                ConsoleLevel::Warn => eprintln!("warning: {}", line.text),
                ConsoleLevel::Error => eprintln!("error: {}", line.text),
            }
        }

        let mut history = self.history.borrow_mut();
        if history.len() == HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(line);
        true
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.get()
    }

    /// Recent lines, oldest first.
    pub fn history(&self) -> Vec<ConsoleLine> {
        self.history.borrow().iter().cloned().collect()
    }
}

/// Text for a value passed to a console function.
///
/// Strings are written bare; everything else uses Rhai's own formatting.
pub fn console_text(value: &Dynamic) -> String {
    if value.is_string() {
        return value.clone().into_string().unwrap_or_default();
    }
    if value.is_unit() {
        return "()".to_string();
    }
    value.to_string()
}
