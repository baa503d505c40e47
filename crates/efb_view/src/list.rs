//! List reconciler
//!
//! Renders one item view per element of an [`ArraySubject`] and keeps the
//! rendered items in step with the array's change events. After every event
//! the reconciler holds exactly one item slot per array element, in the same
//! order, and the list element's children are the slot elements in that
//! order (unless the list is paused, when they are detached).
//!
//! Each item render receives a subscription sink. Subscriptions pushed to it
//! belong to that item: they pause and resume with the list and are
//! destroyed when the item is removed.

use efb_core::{ArrayChange, ArraySubject, Subscription};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::ViewError;
use crate::host::ElementId;
use crate::tree::{Lifecycle, Scope, ViewId, ViewTree, WeakViewTree};

/// Item render function: `(scope, item, index, sink)`
pub type RenderItem<T> = dyn Fn(&Scope<'_>, &T, usize, &mut Vec<Subscription>);

struct ItemSlot {
    view: ViewId,
    element: ElementId,
    subs: Vec<Subscription>,
}

struct ListState<T> {
    tree: WeakViewTree,
    list: ViewId,
    element: ElementId,
    item_tag: &'static str,
    slots: RefCell<Vec<ItemSlot>>,
    binding: RefCell<Option<Subscription>>,
    render: Box<RenderItem<T>>,
}

impl<T: Clone + 'static> ListState<T> {
    fn apply(&self, tree: &ViewTree, change: &ArrayChange<T>) -> Result<(), ViewError> {
        match change {
            ArrayChange::Added { index, items } => {
                for (offset, item) in items.iter().enumerate() {
                    self.insert_item(tree, index + offset, item)?;
                }
                tracing::debug!(list = ?self.list, index, count = items.len(), "list items added");
                Ok(())
            }
            ArrayChange::Removed { index, .. } => {
                self.remove_item(tree, *index)?;
                tracing::debug!(list = ?self.list, index, "list item removed");
                Ok(())
            }
            ArrayChange::Cleared => {
                while !self.slots.borrow().is_empty() {
                    self.remove_item(tree, 0)?;
                }
                tracing::debug!(list = ?self.list, "list cleared");
                Ok(())
            }
        }
    }

    fn insert_item(&self, tree: &ViewTree, index: usize, item: &T) -> Result<(), ViewError> {
        let len = self.slots.borrow().len();
        if index > len {
            return Err(ViewError::MissingSlot { index, len });
        }

        let view = tree.create(Some(self.list), self.item_tag)?;
        let mut sink = Vec::new();
        tree.render(view, |scope| (self.render)(scope, item, index, &mut sink))?;
        let element = tree.element(view).ok_or(ViewError::UnknownView(view))?;

        let paused = tree.is_paused(self.list);
        if paused {
            for sub in &sink {
                sub.pause();
            }
        } else {
            let anchor = match index {
                0 => None,
                _ => self.slots.borrow().get(index - 1).map(|slot| slot.element),
            };
            tree.with_surface(|surface| surface.insert_after(self.element, anchor, element));
        }

        self.slots.borrow_mut().insert(
            index,
            ItemSlot {
                view,
                element,
                subs: sink,
            },
        );
        Ok(())
    }

    fn remove_item(&self, tree: &ViewTree, index: usize) -> Result<(), ViewError> {
        let slot = {
            let mut slots = self.slots.borrow_mut();
            let len = slots.len();
            if index >= len {
                return Err(ViewError::MissingSlot { index, len });
            }
            slots.remove(index)
        };
        for sub in &slot.subs {
            sub.destroy();
        }
        tree.unmount(slot.view);
        Ok(())
    }

    fn on_change(&self, change: &ArrayChange<T>) {
        let Some(tree) = self.tree.upgrade() else {
            return;
        };
        if let Err(err) = self.apply(&tree, change) {
            tracing::error!(list = ?self.list, %err, "list out of sync with its source");
            debug_assert!(false, "list out of sync with its source: {err}");
        }
    }
}

impl<T: Clone + 'static> Lifecycle for ListState<T> {
    fn on_pause(&self, tree: &ViewTree, _id: ViewId) {
        let slots = self.slots.borrow();
        tree.with_surface(|surface| {
            for slot in slots.iter() {
                surface.remove(slot.element);
            }
        });
        for sub in slots.iter().flat_map(|slot| &slot.subs) {
            sub.pause();
        }
    }

    fn on_resume(&self, tree: &ViewTree, _id: ViewId) {
        let (elements, subs): (Vec<ElementId>, Vec<Subscription>) = {
            let slots = self.slots.borrow();
            (
                slots.iter().map(|slot| slot.element).collect(),
                slots.iter().flat_map(|slot| slot.subs.iter().cloned()).collect(),
            )
        };
        tree.with_surface(|surface| {
            for element in &elements {
                surface.append_child(self.element, *element);
            }
        });
        for sub in &subs {
            sub.resume(true);
        }
    }

    fn on_destroy(&self, tree: &ViewTree, _id: ViewId) {
        if let Some(binding) = self.binding.borrow_mut().take() {
            binding.destroy();
        }
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        for slot in &slots {
            for sub in &slot.subs {
                sub.destroy();
            }
        }
        tree.with_surface(|surface| {
            for slot in &slots {
                surface.release(slot.element);
            }
        });
    }
}

/// Handle to a mounted list
pub struct ListHandle<T> {
    state: Rc<ListState<T>>,
}

impl<T: Clone + 'static> ListHandle<T> {
    /// The list's own view node
    pub fn id(&self) -> ViewId {
        self.state.list
    }

    pub fn element(&self) -> ElementId {
        self.state.element
    }

    pub fn len(&self) -> usize {
        self.state.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.slots.borrow().is_empty()
    }

    /// Item views, in array order
    pub fn rendered(&self) -> Vec<ViewId> {
        self.state.slots.borrow().iter().map(|slot| slot.view).collect()
    }

    /// Subscriptions owned by the item at `index`
    pub fn item_subscriptions(&self, index: usize) -> Vec<Subscription> {
        self.state
            .slots
            .borrow()
            .get(index)
            .map(|slot| slot.subs.clone())
            .unwrap_or_default()
    }
}

impl<T> Clone for ListHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

/// Mount a list view under `parent`, rendering `source` with `render`
///
/// The list node becomes a child of `parent` with its element appended to
/// `host`; item views are children of the list node.
pub fn mount_list<T, F>(
    tree: &ViewTree,
    parent: Option<ViewId>,
    host: ElementId,
    source: &ArraySubject<T>,
    render: F,
) -> Result<ListHandle<T>, ViewError>
where
    T: Clone + 'static,
    F: Fn(&Scope<'_>, &T, usize, &mut Vec<Subscription>) + 'static,
{
    let list = tree.create(parent, "list")?;
    let element = tree.element(list).ok_or(ViewError::UnknownView(list))?;
    tree.with_surface(|surface| surface.append_child(host, element));

    let state = Rc::new(ListState {
        tree: tree.downgrade(),
        list,
        element,
        item_tag: "item",
        slots: RefCell::new(Vec::new()),
        binding: RefCell::new(None),
        render: Box::new(render),
    });

    tree.render(list, |scope| {
        scope.set_hooks(state.clone());
        let weak: Weak<ListState<T>> = Rc::downgrade(&state);
        let binding = source.sub(
            move |change, _| {
                if let Some(state) = weak.upgrade() {
                    state.on_change(change);
                }
            },
            true,
        );
        *state.binding.borrow_mut() = Some(binding);
    })?;

    Ok(ListHandle { state })
}

impl<'a> Scope<'a> {
    /// Mount a list as a child of this view
    pub fn list<T, F>(&self, source: &ArraySubject<T>, render: F) -> Option<ListHandle<T>>
    where
        T: Clone + 'static,
        F: Fn(&Scope<'_>, &T, usize, &mut Vec<Subscription>) + 'static,
    {
        match mount_list(self.tree(), Some(self.id()), self.element(), source, render) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(parent = ?self.id(), %err, "list mount failed");
                None
            }
        }
    }
}
