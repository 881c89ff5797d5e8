//! Engine lifecycle tracking.

use std::{fmt, sync::Mutex};

use crate::error::OcrError;

/// Where an engine is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::ShuttingDown => "shutting_down",
            EngineState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Thread-safe lifecycle state for one engine.
///
/// Engines call [`Lifecycle::ensure_ready`] before doing any work, so nobody
/// can process images before `initialize` finishes or after `cleanup`.
#[derive(Debug)]
pub struct Lifecycle {
    engine: &'static str,
    state: Mutex<EngineState>,
}

impl Lifecycle {
    /// Create a new lifecycle for the named engine.
    pub fn new(engine: &'static str) -> Self {
        Self {
            engine,
            state: Mutex::new(EngineState::Uninitialized),
        }
    }

    /// The current state.
    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("lock poisoned")
    }

    fn not_ready(&self, state: EngineState) -> OcrError {
        OcrError::NotReady {
            engine: self.engine.to_owned(),
            state: state.to_string(),
        }
    }

    /// Move from `Uninitialized` to `Initializing`.
    pub fn begin_initialize(&self) -> Result<(), OcrError> {
        let mut state = self.state.lock().expect("lock poisoned");
        match *state {
            EngineState::Uninitialized => {
                *state = EngineState::Initializing;
                Ok(())
            }
            other => Err(OcrError::Initialization(format!(
                "engine '{}' cannot be initialized while {other}",
                self.engine
            ))),
        }
    }

    /// Record the outcome of initialization. Failed engines go back to
    /// `Uninitialized`.
    pub fn finish_initialize(&self, succeeded: bool) {
        let mut state = self.state.lock().expect("lock poisoned");
        if *state == EngineState::Initializing {
            *state = if succeeded {
                EngineState::Ready
            } else {
                EngineState::Uninitialized
            };
        }
    }

    /// Fail unless the engine is `Ready`.
    pub fn ensure_ready(&self) -> Result<(), OcrError> {
        match self.state() {
            EngineState::Ready => Ok(()),
            other => Err(self.not_ready(other)),
        }
    }

    /// Is the engine ready?
    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Begin shutting down. Returns `false` if the engine is already closed or
    /// closing, in which case cleanup has nothing to do.
    pub fn begin_shutdown(&self) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        match *state {
            EngineState::ShuttingDown | EngineState::Closed => false,
            _ => {
                *state = EngineState::ShuttingDown;
                true
            }
        }
    }

    /// Finish shutting down.
    pub fn finish_shutdown(&self) {
        *self.state.lock().expect("lock poisoned") = EngineState::Closed;
    }
}
