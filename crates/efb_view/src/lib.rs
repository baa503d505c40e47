//! EFB View Layer
//!
//! Stateful views on top of [`efb_core`] observables:
//!
//! - **Host Surface**: the element tree views draw into ([`HostSurface`],
//!   with the in-memory [`MemorySurface`])
//! - **Lifecycle Tree**: pause/resume/destroy cascades over an arena of
//!   view nodes ([`ViewTree`])
//! - **List Reconciler**: one item view per array element ([`mount_list`])
//! - **Switch**: exactly one visible case per key ([`Switch`])

pub mod error;
pub mod host;
pub mod list;
pub mod switch;
pub mod tree;

pub use error::ViewError;
pub use host::{ElementId, HostSurface, MemorySurface};
pub use list::{mount_list, ListHandle, RenderItem};
pub use switch::{Case, Switch, SwitchHandle};
pub use tree::{ChildFilter, Lifecycle, LifecycleOp, Scope, ViewId, ViewTree, WeakViewTree};
