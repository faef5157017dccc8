//! Error taxonomy and the callback sink every layer reports through.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::{error, warn};

use crate::reflect::ReflectError;
use crate::view::ViewError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Adapter or device acquisition.
    Initialization,
    /// Missing features or exceeded limits.
    Compatibility,
    Compilation,
    /// A declared binding has nothing to bind.
    Resource,
    /// Device lost and similar failures while running.
    Runtime,
    /// Malformed caller spec.
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialization => "initialization",
            Self::Compatibility => "compatibility",
            Self::Compilation => "compilation",
            Self::Resource => "resource",
            Self::Runtime => "runtime",
            Self::Validation => "validation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("unsupported on this device: {0}")]
    Compatibility(String),
    #[error("shader compilation failed at {line}:{column}: {message}")]
    Compilation {
        message: String,
        line: u32,
        column: u32,
    },
    #[error(transparent)]
    Reflect(#[from] ReflectError),
    #[error("missing resource: {0}")]
    Resource(String),
    #[error("invalid spec: {0}")]
    Validation(String),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Initialization(_) => ErrorKind::Initialization,
            Self::Compatibility(_) => ErrorKind::Compatibility,
            Self::Compilation { .. } | Self::Reflect(_) => ErrorKind::Compilation,
            Self::Resource(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Resource,
            Self::Validation(_) | Self::View(_) => ErrorKind::Validation,
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }

    /// Builds the record delivered to sink callbacks.
    pub fn record(&self, fatal: bool) -> ErrorRecord {
        let message = self.to_string();
        let details = match self {
            Self::Reflect(e) => Some(format!("at {}", e.span())),
            Self::Compilation { line, column, .. } => Some(format!("at {line}:{column}")),
            _ => None,
        };
        ErrorRecord {
            kind: self.kind(),
            suggestion: suggest(self.kind(), &message),
            message,
            fatal,
            details,
        }
    }
}

/// What callbacks registered on an [`ErrorSink`] receive.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub fatal: bool,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorRecord {
    pub fn warning(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            suggestion: suggest(kind, &message),
            message,
            fatal: false,
            details: None,
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

/// Hints for common failure messages, checked in order.
const SUGGESTIONS: &[(&str, &str)] = &[
    ("unknown type", "check the spelling of the type or declare it before use"),
    ("defined in terms of itself", "break the cycle between the aliases or structs"),
    ("no usable @", "add @group(0) and @binding(n) to every resource"),
    ("not a constant", "array counts and bindings must be constant integer expressions"),
    ("expected", "check the syntax near the reported position"),
    ("entry point", "declare the entry point with @vertex, @fragment or @compute"),
    ("max_storage_buffer_binding_size", "reduce the storage size or request higher limits"),
    ("exceeds the device limit", "reduce the buffer size or request higher limits"),
    ("device lost", "reload the page or restart the application"),
];

/// Looks up a suggestion for a message.
pub fn suggest(kind: ErrorKind, message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    SUGGESTIONS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, hint)| (*hint).to_string())
        .or_else(|| match kind {
            ErrorKind::Initialization => Some("make sure a WebGPU capable adapter is available".into()),
            ErrorKind::Runtime => Some("reload the page or restart the application".into()),
            _ => None,
        })
}

/// What happens to a fatal error once callbacks have seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Fatal errors are handed back to the caller as `Err`.
    #[default]
    Propagate,
    /// Fatal errors are swallowed after the callbacks ran.
    Absorb,
}

type Callback = Box<dyn FnMut(&ErrorRecord)>;

/// Collects error callbacks. Cloning shares the callback list.
#[derive(Clone, Default)]
pub struct ErrorSink {
    callbacks: Rc<RefCell<Vec<Callback>>>,
    policy: FatalPolicy,
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("callbacks", &self.callbacks.borrow().len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: FatalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on_error(&self, callback: impl FnMut(&ErrorRecord) + 'static) {
        self.callbacks.borrow_mut().push(Box::new(callback));
    }

    pub fn emit(&self, record: &ErrorRecord) {
        if record.fatal {
            error!("{record}");
        } else {
            warn!("{record}");
        }
        for callback in self.callbacks.borrow_mut().iter_mut() {
            callback(record);
        }
    }

    pub fn warn(&self, kind: ErrorKind, message: impl Into<String>) {
        self.emit(&ErrorRecord::warning(kind, message));
    }

    /// Reports a fatal error. Returns it back under
    /// [`FatalPolicy::Propagate`], `Ok` under [`FatalPolicy::Absorb`].
    pub fn report(&self, err: Error) -> Result<(), Error> {
        self.emit(&err.record(true));
        match self.policy {
            FatalPolicy::Propagate => Err(err),
            FatalPolicy::Absorb => Ok(()),
        }
    }

    /// Passes a result through, reporting the error on the way.
    pub fn check<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        result.map_err(|err| {
            self.emit(&err.record(true));
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_carry_kind_and_suggestion() {
        let err = Error::Compatibility(
            "storage `cells` needs 512 bytes, max_storage_buffer_binding_size is 256".into(),
        );
        let record = err.record(true);
        assert_eq!(record.kind, ErrorKind::Compatibility);
        assert!(record.fatal);
        assert_eq!(
            record.suggestion.as_deref(),
            Some("reduce the storage size or request higher limits")
        );
    }

    #[test]
    fn sink_policy_decides_propagation() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = ErrorSink::new();
        let log = seen.clone();
        sink.on_error(move |r| log.borrow_mut().push(r.kind));

        assert!(sink.report(Error::validation("bad")).is_err());
        sink.warn(ErrorKind::Compilation, "unused variable");

        let absorbing = sink.clone().with_policy(FatalPolicy::Absorb);
        assert!(absorbing.report(Error::Runtime("device lost".into())).is_ok());

        assert_eq!(
            *seen.borrow(),
            vec![ErrorKind::Validation, ErrorKind::Compilation, ErrorKind::Runtime]
        );
    }
}
