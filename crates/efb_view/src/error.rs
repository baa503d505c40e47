//! View error types

use thiserror::Error;

use crate::tree::ViewId;

/// Tree-consistency errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// The view was destroyed or never existed
    #[error("unknown view {0:?}")]
    UnknownView(ViewId),

    /// `render` called on a view that already rendered
    #[error("view {0:?} is already rendered")]
    AlreadyRendered(ViewId),

    /// A list change referenced an item slot the reconciler does not have
    #[error("list has no rendered item at index {index} (len {len})")]
    MissingSlot { index: usize, len: usize },
}
