//! Error Types and Diagnostics
//!
//! This module defines the error types used throughout the renderer and the
//! diagnostic sink that routes them to the user-selected error handler.
//!
//! # Overview
//!
//! Failures are described by a [`RenderError`] carrying an [`ErrorKind`].
//! Non-fatal conditions (a malformed primitive, a missing texture) are
//! reported through [`Diagnostics`] and rendering continues; only
//! [`Severity::Fatal`] errors, or any error under the `abort` handler,
//! propagate out of the interface and terminate the frame.
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, RenderError>`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use thiserror::Error;

/// Convenience alias used by all fallible interface calls.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Broad classification of a failure, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidNesting,
    InvalidType,
    InvalidData,
    UnknownSymbol,
    FileNotFound,
    InvalidShadowMap,
    DisplayDriverFailure,
    MaxEyeSplits,
    NonManifoldSubdivision,
    NoDisplacementBound,
    TextureMissingWrapMode,
    BadInlineDeclaration,
    BadToken,
    Unimplemented,
    InternalBug,
}

/// How serious a diagnostic is. `Fatal` drops the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// The main error type for the renderer.
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    /// A scope call arrived in a context that does not permit it.
    #[error("invalid nesting: {0}")]
    InvalidNesting(String),

    /// A parameter or option carried the wrong type.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// Geometry or parameter data is malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A name lookup (token, shader, coordinate system, handle) failed.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A file could not be located on any search path.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A shadow map file is missing its matrices or depth data.
    #[error("invalid shadow map: {0}")]
    InvalidShadowMap(String),

    /// The display driver rejected a bucket or failed to open.
    #[error("display driver failure: {0}")]
    DisplayDriverFailure(String),

    /// A primitive straddling the camera plane split too many times.
    #[error("max eyesplits exceeded")]
    MaxEyeSplits,

    /// A subdivision mesh contains a non-manifold edge.
    #[error("non-manifold subdivision mesh: {0}")]
    NonManifoldSubdivision(String),

    /// A displacement shader is bound but no displacement bound was given.
    #[error("displacement shader without a displacement bound")]
    NoDisplacementBound,

    /// A texture file carries no wrap-mode metadata.
    #[error("texture missing wrap modes: {0}")]
    TextureMissingWrapMode(String),

    /// An inline declaration could not be parsed.
    #[error("bad inline declaration: {0}")]
    BadInlineDeclaration(String),

    /// A token string is malformed.
    #[error("bad token: {0}")]
    BadToken(String),

    /// A documented capability this build does not provide.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// An internal invariant was violated.
    #[error("internal bug: {0}")]
    InternalBug(String),
}

impl RenderError {
    /// The [`ErrorKind`] classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidNesting(_) => ErrorKind::InvalidNesting,
            Self::InvalidType(_) => ErrorKind::InvalidType,
            Self::InvalidData(_) => ErrorKind::InvalidData,
            Self::UnknownSymbol(_) => ErrorKind::UnknownSymbol,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::InvalidShadowMap(_) => ErrorKind::InvalidShadowMap,
            Self::DisplayDriverFailure(_) => ErrorKind::DisplayDriverFailure,
            Self::MaxEyeSplits => ErrorKind::MaxEyeSplits,
            Self::NonManifoldSubdivision(_) => ErrorKind::NonManifoldSubdivision,
            Self::NoDisplacementBound => ErrorKind::NoDisplacementBound,
            Self::TextureMissingWrapMode(_) => ErrorKind::TextureMissingWrapMode,
            Self::BadInlineDeclaration(_) => ErrorKind::BadInlineDeclaration,
            Self::BadToken(_) => ErrorKind::BadToken,
            Self::Unimplemented(_) => ErrorKind::Unimplemented,
            Self::InternalBug(_) => ErrorKind::InternalBug,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(e.to_string())
        } else {
            Self::InvalidData(format!("io error: {e}"))
        }
    }
}

/// The user-selectable error handler, set through the interface's
/// error-handler call (`"ignore"`, `"print"` or `"abort"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorHandler {
    Ignore,
    #[default]
    Print,
    Abort,
}

impl ErrorHandler {
    /// Resolves a handler by its interface name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "ignore" => Ok(Self::Ignore),
            "print" => Ok(Self::Print),
            "abort" => Ok(Self::Abort),
            other => Err(RenderError::UnknownSymbol(format!(
                "error handler \"{other}\""
            ))),
        }
    }
}

/// Diagnostic sink shared by every component of the renderer.
///
/// Routes each reported error to the current handler and suppresses
/// repeat emissions of the same (kind, scope id, message) tuple when the
/// report site asks for once-per delivery.
pub struct Diagnostics {
    handler: AtomicU8,
    seen: Mutex<FxHashSet<(ErrorKind, u64, String)>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: AtomicU8::new(ErrorHandler::Print as u8),
            seen: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn set_handler(&self, handler: ErrorHandler) {
        self.handler.store(handler as u8, Ordering::Relaxed);
    }

    #[must_use]
    pub fn handler(&self) -> ErrorHandler {
        match self.handler.load(Ordering::Relaxed) {
            0 => ErrorHandler::Ignore,
            2 => ErrorHandler::Abort,
            _ => ErrorHandler::Print,
        }
    }

    /// Reports a diagnostic at the given severity.
    ///
    /// Returns `Err` when the frame must terminate: either the severity is
    /// [`Severity::Fatal`], or the `abort` handler is active and the
    /// severity is at least [`Severity::Error`].
    pub fn report(&self, severity: Severity, error: &RenderError) -> Result<()> {
        let handler = self.handler();
        if handler != ErrorHandler::Ignore {
            match severity {
                Severity::Info => log::info!("{error}"),
                Severity::Warning => log::warn!("{error}"),
                Severity::Error | Severity::Fatal => log::error!("{error}"),
            }
        }
        if severity == Severity::Fatal
            || (handler == ErrorHandler::Abort && severity >= Severity::Error)
        {
            return Err(error.clone());
        }
        Ok(())
    }

    /// Like [`Diagnostics::report`], but emits a given (kind, scope, message)
    /// tuple only once. `scope` is typically an attribute-state id so a bad
    /// attribute block complains a single time across all its primitives.
    pub fn report_once(&self, severity: Severity, scope: u64, error: &RenderError) -> Result<()> {
        let key = (error.kind(), scope, error.to_string());
        if !self.seen.lock().insert(key) {
            return Ok(());
        }
        self.report(severity, error)
    }

    /// Shorthand for a warning that never terminates the frame.
    pub fn warn(&self, error: &RenderError) {
        // Warnings cannot escalate, even under "abort".
        let _ = self.report(Severity::Warning, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_by_name() {
        assert_eq!(ErrorHandler::by_name("ignore").unwrap(), ErrorHandler::Ignore);
        assert_eq!(ErrorHandler::by_name("print").unwrap(), ErrorHandler::Print);
        assert_eq!(ErrorHandler::by_name("abort").unwrap(), ErrorHandler::Abort);
        assert!(ErrorHandler::by_name("nope").is_err());
    }

    #[test]
    fn fatal_always_propagates() {
        let diags = Diagnostics::new();
        diags.set_handler(ErrorHandler::Ignore);
        let err = RenderError::InvalidNesting("world inside object".into());
        assert!(diags.report(Severity::Fatal, &err).is_err());
    }

    #[test]
    fn abort_escalates_errors_but_not_warnings() {
        let diags = Diagnostics::new();
        diags.set_handler(ErrorHandler::Abort);
        let err = RenderError::InvalidData("bad polygon".into());
        assert!(diags.report(Severity::Error, &err).is_err());
        assert!(diags.report(Severity::Warning, &err).is_ok());
    }

    #[test]
    fn once_per_suppresses_repeats() {
        let diags = Diagnostics::new();
        let err = RenderError::MaxEyeSplits;
        assert!(diags.report_once(Severity::Error, 7, &err).is_ok());
        // Second report of the same tuple is swallowed entirely.
        diags.set_handler(ErrorHandler::Abort);
        assert!(diags.report_once(Severity::Error, 7, &err).is_ok());
        // A different scope id reports again.
        assert!(diags.report_once(Severity::Error, 8, &err).is_err());
    }
}
