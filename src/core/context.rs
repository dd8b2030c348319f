//! Per-image diagnostic context.
//!
//! One [`Context`] is created when an image is opened and dropped when the
//! image is closed. Nodes reach it through their enclosing image for error
//! reporting. Diagnostics are advisory text for humans; the control-flow
//! contract is always the returned `Result`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use tracing::{debug, error, warn};

bitflags! {
    /// Behaviour switches for a [`Context`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextFlags: u32 {
        /// Keep every diagnostic in memory for later inspection.
        const RETAIN_DIAGNOSTICS = 1 << 0;
        /// Do not forward diagnostics to `tracing`.
        const QUIET = 1 << 1;
    }
}

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single formatted message pushed to a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// The diagnostic sink shared by all nodes of one image.
pub struct Context {
    name: String,
    flags: ContextFlags,
    retained: RefCell<Vec<Diagnostic>>,
}

impl Context {
    pub fn new(name: impl Into<String>, flags: ContextFlags) -> Self {
        Self {
            name: name.into(),
            flags,
            retained: RefCell::new(Vec::new()),
        }
    }

    /// The image name diagnostics are tagged with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    /// Push a diagnostic.
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();

        if !self.flags.contains(ContextFlags::QUIET) {
            match severity {
                Severity::Debug => debug!(image = %self.name, "{}", message),
                Severity::Warning => warn!(image = %self.name, "{}", message),
                Severity::Error => error!(image = %self.name, "{}", message),
            }
        }

        if self.flags.contains(ContextFlags::RETAIN_DIAGNOSTICS) {
            self.retained.borrow_mut().push(Diagnostic { severity, message });
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    /// Snapshot of the retained diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.retained.borrow().clone()
    }

    /// Drain the retained diagnostics.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.retained.borrow_mut())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("retained", &self.retained.borrow().len())
            .finish()
    }
}
