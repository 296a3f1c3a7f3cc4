//! Error taxonomy and the severity-routed error log.
//!
//! This is the shared error type for the whole layer: backends translate
//! native failures into an [`ErrorKind`] and record a contextual
//! [`ErrorRecord`] through the [`ErrorLog`] attached to their device.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::Location;
use std::time::SystemTime;

use crate::capability::BackendKind;

/// Default bound on the error history ring.
pub const DEFAULT_ERROR_HISTORY: usize = 100;

//--------------------------------------------------------------------------------------------------

/// Backend-agnostic error kinds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ErrorKind {
    #[error("initialization failed")]
    InitializationFailed,
    #[error("device creation failed")]
    DeviceCreationFailed,
    #[error("device lost")]
    DeviceLost,
    #[error("backend not available")]
    BackendNotAvailable,
    #[error("backend not supported by this build")]
    BackendNotSupported,
    #[error("feature not supported by the active backend")]
    FeatureNotSupported,
    #[error("swap chain creation failed")]
    SwapChainCreationFailed,
    #[error("swap chain out of date")]
    SwapChainOutOfDate,
    #[error("resource creation failed")]
    ResourceCreationFailed,
    #[error("invalid resource")]
    InvalidResource,
    #[error("resource busy")]
    ResourceBusy,
    #[error("resource not bound")]
    ResourceNotBound,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid command buffer")]
    InvalidCommandBuffer,
    #[error("command submission failed")]
    CommandSubmissionFailed,
    #[error("command buffer full")]
    CommandBufferFull,
    #[error("timeout expired")]
    TimeoutExpired,
    #[error("wait failed")]
    WaitFailed,
    #[error("invalid pipeline state")]
    InvalidPipelineState,
    #[error("shader compilation failed")]
    ShaderCompilationFailed,
    #[error("incompatible pipeline layout")]
    IncompatiblePipelineLayout,
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("incompatible format")]
    IncompatibleFormat,
    #[error("out of memory")]
    OutOfMemory,
    #[error("allocation failed")]
    AllocationFailed,
    #[error("invalid alignment")]
    InvalidAlignment,
    #[error("invalid memory access")]
    InvalidMemoryAccess,
    #[error("validation error")]
    ValidationError,
    #[error("render pass already in progress")]
    RenderPassInProgress,
    #[error("no render pass in progress")]
    RenderPassNotInProgress,
}

impl ErrorKind {
    /// Kinds the manager or adaptive renderer handle locally and retry once.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::SwapChainOutOfDate | ErrorKind::DeviceLost | ErrorKind::BackendNotAvailable
        )
    }
}

/// Severity of a recorded error.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    fn log_level(self) -> log::Level {
        match self {
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Critical => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

//--------------------------------------------------------------------------------------------------

/// The error value carried by every fallible operation in the layer.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GraphicsError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GraphicsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> GraphicsError {
        GraphicsError {
            kind,
            message: message.into(),
        }
    }
}

impl From<ErrorKind> for GraphicsError {
    fn from(kind: ErrorKind) -> GraphicsError {
        GraphicsError {
            kind,
            message: String::new(),
        }
    }
}

pub type Result<T> = ::std::result::Result<T, GraphicsError>;

//--------------------------------------------------------------------------------------------------

/// One entry of the bounded error history.
#[derive(Clone, Debug)]
pub struct ErrorRecord {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub message: String,
    pub backend: BackendKind,
    pub file: &'static str,
    pub line: u32,
    pub timestamp: SystemTime,
    pub additional_info: Option<String>,
}

/// Bounded ring of error records, shared by a device and everything it owns.
///
/// Records are routed to the `log` facade at the level matching their
/// severity. `Critical` records never abort; the host decides whether to
/// continue.
pub struct ErrorLog {
    backend: BackendKind,
    debug_mode: bool,
    records: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl ErrorLog {
    pub fn new(backend: BackendKind, debug_mode: bool) -> ErrorLog {
        ErrorLog::with_capacity(backend, debug_mode, DEFAULT_ERROR_HISTORY)
    }

    pub fn with_capacity(backend: BackendKind, debug_mode: bool, capacity: usize) -> ErrorLog {
        ErrorLog {
            backend,
            debug_mode,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Records an error with the caller's source location.
    ///
    /// Validation errors are downgraded to `Warning` when the device was not
    /// created in debug mode.
    #[track_caller]
    pub fn record(&self, severity: Severity, kind: ErrorKind, message: impl Into<String>) {
        self.record_with_info(severity, kind, message, None)
    }

    #[track_caller]
    pub fn record_with_info(
        &self,
        severity: Severity,
        kind: ErrorKind,
        message: impl Into<String>,
        additional_info: Option<String>,
    ) {
        let severity = if kind == ErrorKind::ValidationError && !self.debug_mode {
            Severity::Warning.min(severity)
        } else {
            severity
        };
        let message = message.into();
        let loc = Location::caller();

        log::log!(
            severity.log_level(),
            "({}) {}: {}",
            self.backend.name(),
            kind,
            message
        );

        let record = ErrorRecord {
            severity,
            kind,
            message,
            backend: self.backend,
            file: loc.file(),
            line: loc.line(),
            timestamp: SystemTime::now(),
            additional_info,
        };

        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records and returns the error in one step, for `return` on error paths.
    #[track_caller]
    pub fn fail<T>(
        &self,
        severity: Severity,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<T> {
        let message = message.into();
        self.record(severity, kind, message.clone());
        Err(GraphicsError::new(kind, message))
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Most recent records, newest last.
    pub fn recent(&self, count: usize) -> Vec<ErrorRecord> {
        let records = self.records.lock();
        let skip = records.len().saturating_sub(count);
        records.iter().skip(skip).cloned().collect()
    }

    /// Whether any record of `kind` is present in the retained history.
    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.records.lock().iter().any(|r| r.kind == kind)
    }

    pub fn clear(&self) {
        self.records.lock().clear()
    }
}

impl fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ErrorLog")
            .field("backend", &self.backend)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let log = ErrorLog::with_capacity(BackendKind::Software, true, 3);
        for i in 0..10 {
            log.record(Severity::Error, ErrorKind::InvalidOperation, format!("e{}", i));
        }
        assert_eq!(log.len(), 3);
        let recent = log.recent(3);
        assert_eq!(recent[0].message, "e7");
        assert_eq!(recent[2].message, "e9");
    }

    #[test]
    fn validation_downgraded_without_debug_mode() {
        let log = ErrorLog::new(BackendKind::Software, false);
        log.record(Severity::Error, ErrorKind::ValidationError, "oops");
        assert_eq!(log.recent(1)[0].severity, Severity::Warning);

        let log = ErrorLog::new(BackendKind::Software, true);
        log.record(Severity::Error, ErrorKind::ValidationError, "oops");
        assert_eq!(log.recent(1)[0].severity, Severity::Error);
    }

    #[test]
    fn recoverable_kinds() {
        assert!(ErrorKind::SwapChainOutOfDate.is_recoverable());
        assert!(ErrorKind::DeviceLost.is_recoverable());
        assert!(!ErrorKind::OutOfMemory.is_recoverable());
    }
}
