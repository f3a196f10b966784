use parking_lot::Mutex;
use tracing::debug;

use crate::transport::{NavigateMode, Navigator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub path: String,
    pub mode: NavigateMode,
}

#[derive(Debug)]
struct HistoryState {
    stack: Vec<String>,
    /// Every navigation in order, including replaces and reloads.
    log: Vec<HistoryEntry>,
    reloads: usize,
}

/// In-process stand-in for the browser's location and history stack.
#[derive(Debug)]
pub struct BrowserHistory {
    state: Mutex<HistoryState>,
}

impl BrowserHistory {
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(HistoryState {
                stack: vec![start.into()],
                log: vec![],
                reloads: 0,
            }),
        }
    }

    /// Steps back one entry; stays put at the bottom of the stack.
    pub fn back(&self) -> String {
        let mut state = self.state.lock();
        if state.stack.len() > 1 {
            state.stack.pop();
        }
        state.stack.last().cloned().unwrap_or_else(|| "/".to_string())
    }

    pub fn depth(&self) -> usize {
        self.state.lock().stack.len()
    }

    /// Number of hard navigations (full reloads) so far.
    pub fn reloads(&self) -> usize {
        self.state.lock().reloads
    }

    pub fn log(&self) -> Vec<HistoryEntry> {
        self.state.lock().log.clone()
    }
}

impl Navigator for BrowserHistory {
    fn current_path(&self) -> String {
        self.state
            .lock()
            .stack
            .last()
            .cloned()
            .unwrap_or_else(|| "/".to_string())
    }

    fn navigate(&self, path: &str, mode: NavigateMode) {
        let mut state = self.state.lock();
        match mode {
            NavigateMode::Push => state.stack.push(path.to_string()),
            NavigateMode::Replace => {
                state.stack.pop();
                state.stack.push(path.to_string());
            }
            NavigateMode::Hard => {
                state.stack.push(path.to_string());
                state.reloads += 1;
            }
        }
        state.log.push(HistoryEntry {
            path: path.to_string(),
            mode,
        });
        debug!(path, ?mode, depth = state.stack.len(), "navigated");
    }
}
