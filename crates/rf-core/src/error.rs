use thiserror::Error;

use crate::events::EventKind;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Index out of bounds: {what} (index={index}, len={len})")]
    IndexOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Event {kind} already marked at index {index}")]
    AlreadyMarked { kind: EventKind, index: usize },
}
