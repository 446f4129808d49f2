// Engine error taxonomy
//
// Session-gone conditions are never surfaced as hard errors: the remote
// state is gone by definition, so facade boundaries map them to absent
// results. Everything else is a named failure the caller decides on.

use thiserror::Error;
use uiscope_wire::types::ThreadId;
use uiscope_wire::WireError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The target disconnected, the object was collected, or the class is
    /// no longer prepared. Nothing more to report.
    #[error("target session is gone")]
    SessionGone,

    /// The target thread left the state a remote call required; further
    /// calls against it are unsafe until re-synchronized.
    #[error("target thread state changed")]
    ThreadState,

    /// An expected remote capability is missing (unsupported runtime
    /// version, absent method or class).
    #[error("missing remote capability: {0}")]
    Retrieval(String),

    /// The target's own code threw during an invocation.
    #[error("target code threw {class_name}: {message}")]
    Invocation {
        class_name: String,
        message: String,
        remote_stack: Vec<String>,
        preferred_thread: Option<ThreadId>,
    },

    /// A locally-edited property value could not be converted back to the
    /// remote type. The previous value is preserved.
    #[error("cannot apply edit: {0}")]
    BadEdit(String),

    #[error("wire error: {0}")]
    Wire(WireError),
}

impl From<WireError> for EngineError {
    fn from(e: WireError) -> Self {
        if e.is_session_gone() {
            EngineError::SessionGone
        } else if e.is_thread_state() {
            EngineError::ThreadState
        } else {
            EngineError::Wire(e)
        }
    }
}

impl EngineError {
    pub fn is_session_gone(&self) -> bool {
        matches!(self, EngineError::SessionGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_classification() {
        let gone: EngineError = WireError::ConnectionClosed.into();
        assert!(gone.is_session_gone());

        let gone: EngineError = WireError::ErrorCode(112, "VM_DEAD").into();
        assert!(gone.is_session_gone());

        let state: EngineError = WireError::ErrorCode(13, "THREAD_NOT_SUSPENDED").into();
        assert!(matches!(state, EngineError::ThreadState));

        let other: EngineError = WireError::ErrorCode(34, "TYPE_MISMATCH").into();
        assert!(matches!(other, EngineError::Wire(_)));
    }

}
