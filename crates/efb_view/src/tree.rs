//! View lifecycle tree
//!
//! Every view is a node in an arena owned by [`ViewTree`]. A node owns its
//! subscriptions, one host element and the children registered while it
//! rendered. Three lifecycle operations walk the tree:
//!
//! - `pause`: stop all value delivery to the node and its descendants
//! - `resume`: restart delivery, replaying current values so nothing is stale
//! - `destroy`: tear down subscriptions and remove the nodes for good
//!
//! Each step runs in a fixed order on a node (flag, owned subscriptions,
//! composite hook) and then cascades over the registered children. All
//! operations are idempotent and silently ignore ids of destroyed nodes.
//!
//! ```rust
//! use efb_core::Subject;
//! use efb_view::{MemorySurface, ViewTree};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let surface = Rc::new(RefCell::new(MemorySurface::new()));
//! let root_el = surface.borrow().root();
//! let tree = ViewTree::new(surface.clone());
//!
//! let altitude = Subject::new(3500);
//! let gauge = tree
//!     .mount(None, root_el, "gauge", |scope| {
//!         scope.bind_text(&altitude, |ft| format!("{ft} ft"));
//!     })
//!     .unwrap();
//!
//! tree.pause(gauge);
//! altitude.set(4000);
//! assert_eq!(surface.borrow().visible_texts(root_el), vec!["3500 ft"]);
//!
//! tree.resume(gauge);
//! assert_eq!(surface.borrow().visible_texts(root_el), vec!["4000 ft"]);
//! ```

use efb_core::{Observable, Subscription};
use slotmap::{new_key_type, Key, SlotMap};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::ViewError;
use crate::host::{ElementId, HostSurface};

new_key_type! {
    /// Arena key of a view node
    pub struct ViewId;
}

impl ViewId {
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }
}

/// The three lifecycle operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    Pause,
    Resume,
    Destroy,
}

/// Pending work of a lifecycle walk
#[derive(Clone, Copy)]
enum Step {
    /// Run the operation on the node, then on its children
    Apply(ViewId),
    /// Filter-skipped node: only its children are reached
    Visit(ViewId),
    /// Drop a destroyed node once its subtree is done
    Remove(ViewId),
}

/// Selects which descendants a cascade applies to
///
/// A descendant for which the filter returns `false` is skipped, but the
/// cascade still continues into its children.
pub type ChildFilter<'a> = &'a dyn Fn(ViewId) -> bool;

/// Hooks for composite views (lists, switches) that manage state beyond
/// their owned subscriptions
///
/// Hooks run after the node's own subscriptions were handled and before the
/// cascade reaches its children.
pub trait Lifecycle {
    fn on_pause(&self, _tree: &ViewTree, _id: ViewId) {}

    fn on_resume(&self, _tree: &ViewTree, _id: ViewId) {}

    fn on_destroy(&self, _tree: &ViewTree, _id: ViewId) {}

    /// Whether `op` should cascade into `child` at all
    fn cascades_to(&self, _child: ViewId, _op: LifecycleOp) -> bool {
        true
    }
}

struct ViewNode {
    tag: Rc<str>,
    parent: Option<ViewId>,
    children: SmallVec<[ViewId; 4]>,
    subscriptions: Vec<Subscription>,
    element: ElementId,
    hooks: Option<Rc<dyn Lifecycle>>,
    paused: bool,
    rendered: bool,
    destroying: bool,
}

struct TreeInner {
    nodes: RefCell<SlotMap<ViewId, ViewNode>>,
    surface: Rc<RefCell<dyn HostSurface>>,
}

/// Arena of view nodes bound to one host surface
///
/// Cloning yields another handle to the same tree.
#[derive(Clone)]
pub struct ViewTree {
    inner: Rc<TreeInner>,
}

/// Non-owning handle to a [`ViewTree`], for use inside callbacks
#[derive(Clone)]
pub struct WeakViewTree {
    inner: Weak<TreeInner>,
}

impl WeakViewTree {
    pub fn upgrade(&self) -> Option<ViewTree> {
        self.inner.upgrade().map(|inner| ViewTree { inner })
    }
}

impl ViewTree {
    pub fn new(surface: Rc<RefCell<dyn HostSurface>>) -> Self {
        Self {
            inner: Rc::new(TreeInner {
                nodes: RefCell::new(SlotMap::with_key()),
                surface,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakViewTree {
        WeakViewTree {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn surface(&self) -> Rc<RefCell<dyn HostSurface>> {
        Rc::clone(&self.inner.surface)
    }

    /// Run `f` with the host surface borrowed mutably
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut dyn HostSurface) -> R) -> R {
        let mut surface = self.inner.surface.borrow_mut();
        f(&mut *surface)
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Create an unrendered node with a detached element
    ///
    /// A child of a paused parent starts paused.
    pub fn create(&self, parent: Option<ViewId>, tag: &str) -> Result<ViewId, ViewError> {
        let paused = match parent {
            Some(parent) => self
                .inner
                .nodes
                .borrow()
                .get(parent)
                .filter(|node| !node.destroying)
                .map(|node| node.paused)
                .ok_or(ViewError::UnknownView(parent))?,
            None => false,
        };

        let element = self.with_surface(|surface| surface.create_element(tag));
        let id = self.inner.nodes.borrow_mut().insert(ViewNode {
            tag: Rc::from(tag),
            parent,
            children: SmallVec::new(),
            subscriptions: Vec::new(),
            element,
            hooks: None,
            paused,
            rendered: false,
            destroying: false,
        });
        if let Some(parent) = parent {
            if let Some(node) = self.inner.nodes.borrow_mut().get_mut(parent) {
                node.children.push(id);
            }
        }
        tracing::trace!(?id, tag, paused, "view created");
        Ok(id)
    }

    /// Render a node once; `f` registers subscriptions and children
    pub fn render(&self, id: ViewId, f: impl FnOnce(&Scope<'_>)) -> Result<(), ViewError> {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let node = nodes.get_mut(id).ok_or(ViewError::UnknownView(id))?;
            if node.rendered {
                return Err(ViewError::AlreadyRendered(id));
            }
            node.rendered = true;
        }
        f(&Scope { tree: self, id });
        Ok(())
    }

    /// Create a node, attach its element under `host` and render it
    pub fn mount(
        &self,
        parent: Option<ViewId>,
        host: ElementId,
        tag: &str,
        f: impl FnOnce(&Scope<'_>),
    ) -> Result<ViewId, ViewError> {
        let id = self.create(parent, tag)?;
        if let Some(element) = self.element(id) {
            self.with_surface(|surface| surface.append_child(host, element));
        }
        self.render(id, f)?;
        Ok(id)
    }

    /// Destroy a node and free its element
    pub fn unmount(&self, id: ViewId) {
        let Some(element) = self.element(id) else {
            return;
        };
        self.destroy(id);
        self.with_surface(|surface| {
            surface.remove(element);
            surface.release(element);
        });
    }

    /// Hand ownership of `sub` to a node
    ///
    /// On a paused node the subscription is paused right away; on an unknown
    /// or destroyed node it is destroyed.
    pub fn add_subscription(&self, id: ViewId, sub: Subscription) {
        let accepted = self
            .inner
            .nodes
            .borrow_mut()
            .get_mut(id)
            .filter(|node| !node.destroying)
            .map(|node| {
                node.subscriptions.push(sub.clone());
                node.paused
            });
        match accepted {
            Some(true) => sub.pause(),
            Some(false) => {}
            None => {
                tracing::trace!(?id, "subscription added to a dead view");
                sub.destroy();
            }
        }
    }

    pub fn set_hooks(&self, id: ViewId, hooks: Rc<dyn Lifecycle>) {
        if let Some(node) = self.inner.nodes.borrow_mut().get_mut(id) {
            node.hooks = Some(hooks);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn pause(&self, id: ViewId) {
        self.pause_filtered(id, None);
    }

    pub fn pause_filtered(&self, id: ViewId, filter: Option<ChildFilter<'_>>) {
        self.run(id, LifecycleOp::Pause, filter);
    }

    pub fn resume(&self, id: ViewId) {
        self.resume_filtered(id, None);
    }

    pub fn resume_filtered(&self, id: ViewId, filter: Option<ChildFilter<'_>>) {
        self.run(id, LifecycleOp::Resume, filter);
    }

    pub fn destroy(&self, id: ViewId) {
        self.destroy_filtered(id, None);
    }

    /// Destroy a node and its descendants
    ///
    /// Descendants skipped by `filter` survive as detached roots.
    pub fn destroy_filtered(&self, id: ViewId, filter: Option<ChildFilter<'_>>) {
        self.run(id, LifecycleOp::Destroy, filter);
    }

    /// Walk `op` depth-first from `root` with an explicit stack, so the
    /// depth of the tree is bounded by memory rather than the call stack
    fn run(&self, root: ViewId, op: LifecycleOp, filter: Option<ChildFilter<'_>>) {
        let mut stack: SmallVec<[Step; 16]> = SmallVec::new();
        stack.push(Step::Apply(root));

        while let Some(step) = stack.pop() {
            let id = match step {
                Step::Apply(id) => {
                    if !self.apply(id, op) {
                        continue;
                    }
                    if op == LifecycleOp::Destroy {
                        stack.push(Step::Remove(id));
                    }
                    id
                }
                Step::Visit(id) => id,
                Step::Remove(id) => {
                    self.remove_node(id);
                    continue;
                }
            };
            self.push_children(id, op, filter, &mut stack);
        }
    }

    /// Run `op` on one node; false when it was a no-op there
    fn apply(&self, id: ViewId, op: LifecycleOp) -> bool {
        let (subs, hooks) = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(id) else {
                return false;
            };
            if node.destroying {
                return false;
            }
            match op {
                LifecycleOp::Pause if node.paused => return false,
                LifecycleOp::Resume if !node.paused => return false,
                LifecycleOp::Pause => node.paused = true,
                LifecycleOp::Resume => node.paused = false,
                LifecycleOp::Destroy => node.destroying = true,
            }
            let subs = match op {
                LifecycleOp::Destroy => std::mem::take(&mut node.subscriptions),
                _ => node.subscriptions.clone(),
            };
            (subs, node.hooks.clone())
        };
        tracing::trace!(?id, ?op, subscriptions = subs.len(), "lifecycle");

        match op {
            LifecycleOp::Pause => {
                for sub in &subs {
                    sub.pause();
                }
                if let Some(hooks) = &hooks {
                    hooks.on_pause(self, id);
                }
            }
            LifecycleOp::Resume => {
                for sub in &subs {
                    sub.resume(true);
                }
                if let Some(hooks) = &hooks {
                    hooks.on_resume(self, id);
                }
            }
            LifecycleOp::Destroy => {
                for sub in &subs {
                    sub.destroy();
                }
                if let Some(hooks) = &hooks {
                    hooks.on_destroy(self, id);
                }
            }
        }
        true
    }

    /// Queue the children `op` cascades into, first child on top
    fn push_children(
        &self,
        id: ViewId,
        op: LifecycleOp,
        filter: Option<ChildFilter<'_>>,
        stack: &mut SmallVec<[Step; 16]>,
    ) {
        let (children, hooks) = {
            let nodes = self.inner.nodes.borrow();
            let Some(node) = nodes.get(id) else {
                return;
            };
            if !node.rendered {
                tracing::trace!(?id, ?op, "unrendered view, cascade skipped");
                return;
            }
            (node.children.clone(), node.hooks.clone())
        };

        for child in children.into_iter().rev() {
            if let Some(hooks) = &hooks {
                if !hooks.cascades_to(child, op) {
                    continue;
                }
            }
            if filter.map_or(true, |f| f(child)) {
                stack.push(Step::Apply(child));
            } else {
                stack.push(Step::Visit(child));
            }
        }
    }

    /// Drop a destroyed node from the arena; children still present were
    /// skipped by the filter and become roots
    fn remove_node(&self, id: ViewId) {
        let mut nodes = self.inner.nodes.borrow_mut();
        let Some(node) = nodes.remove(id) else {
            tracing::error!(?id, "view vanished while being destroyed");
            debug_assert!(false, "view {id:?} vanished while being destroyed");
            return;
        };
        for survivor in &node.children {
            if let Some(child) = nodes.get_mut(*survivor) {
                child.parent = None;
            }
        }
        if let Some(parent) = node.parent.and_then(|p| nodes.get_mut(p)) {
            parent.children.retain(|c| *c != id);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn contains(&self, id: ViewId) -> bool {
        self.inner.nodes.borrow().contains_key(id)
    }

    /// Whether the node is paused; false for unknown ids
    pub fn is_paused(&self, id: ViewId) -> bool {
        self.inner.nodes.borrow().get(id).is_some_and(|node| node.paused)
    }

    pub fn is_rendered(&self, id: ViewId) -> bool {
        self.inner.nodes.borrow().get(id).is_some_and(|node| node.rendered)
    }

    pub fn children(&self, id: ViewId) -> Vec<ViewId> {
        self.inner
            .nodes
            .borrow()
            .get(id)
            .map(|node| node.children.to_vec())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: ViewId) -> Option<ViewId> {
        self.inner.nodes.borrow().get(id).and_then(|node| node.parent)
    }

    pub fn element(&self, id: ViewId) -> Option<ElementId> {
        self.inner.nodes.borrow().get(id).map(|node| node.element)
    }

    pub fn tag(&self, id: ViewId) -> Option<Rc<str>> {
        self.inner.nodes.borrow().get(id).map(|node| Rc::clone(&node.tag))
    }

    pub fn subscription_count(&self, id: ViewId) -> usize {
        self.inner
            .nodes
            .borrow()
            .get(id)
            .map_or(0, |node| node.subscriptions.len())
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.borrow().is_empty()
    }
}

impl fmt::Debug for ViewTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewTree")
            .field("nodes", &self.inner.nodes.borrow().len())
            .finish()
    }
}

/// Render context of one view node
pub struct Scope<'a> {
    tree: &'a ViewTree,
    id: ViewId,
}

impl<'a> Scope<'a> {
    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn tree(&self) -> &'a ViewTree {
        self.tree
    }

    /// This node's host element
    pub fn element(&self) -> ElementId {
        // Present for the whole render call.
        self.tree.element(self.id).unwrap_or_default()
    }

    /// Take ownership of an existing subscription
    pub fn own(&self, sub: Subscription) -> Subscription {
        self.tree.add_subscription(self.id, sub.clone());
        sub
    }

    /// Subscribe to `source` for the lifetime of this view; the callback
    /// runs immediately with the current value
    pub fn subscribe<T, O, F>(&self, source: &O, callback: F) -> Subscription
    where
        T: Clone + 'static,
        O: Observable<T>,
        F: Fn(&T) + 'static,
    {
        self.own(source.sub(callback, true))
    }

    /// Mount a child view whose element is appended to this node's element
    pub fn child(&self, tag: &str, f: impl FnOnce(&Scope<'_>)) -> ViewId {
        match self.tree.mount(Some(self.id), self.element(), tag, f) {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(parent = ?self.id, %err, "child mount failed");
                debug_assert!(false, "child mount failed: {err}");
                ViewId::null()
            }
        }
    }

    pub fn set_text(&self, text: &str) {
        let element = self.element();
        self.tree.with_surface(|surface| surface.set_text(element, text));
    }

    pub fn set_hidden(&self, hidden: bool) {
        let element = self.element();
        self.tree.with_surface(|surface| surface.set_hidden(element, hidden));
    }

    /// Keep this node's text in sync with `source`
    pub fn bind_text<T, O, F>(&self, source: &O, format: F) -> Subscription
    where
        T: Clone + 'static,
        O: Observable<T>,
        F: Fn(&T) -> String + 'static,
    {
        let element = self.element();
        let surface = self.tree.surface();
        self.subscribe(source, move |value| {
            surface.borrow_mut().set_text(element, &format(value));
        })
    }

    pub fn set_hooks(&self, hooks: Rc<dyn Lifecycle>) {
        self.tree.set_hooks(self.id, hooks);
    }
}
