//! Visibility switch
//!
//! Shows exactly one of several cases depending on an observable key, like a
//! tab strip. A case is either a managed page (a view node with its own
//! subscriptions) or a plain host element. Hidden pages stay paused so
//! their data sources cost nothing, and resuming the switch only wakes the
//! page that is visible.

use efb_core::Observable;
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use crate::error::ViewError;
use crate::host::ElementId;
use crate::tree::{Lifecycle, LifecycleOp, Scope, ViewId, ViewTree};

/// One switch case once mounted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Case {
    Page(ViewId),
    Element(ElementId),
}

type PageRender = Box<dyn FnOnce(&Scope<'_>)>;

enum CaseSpec {
    Page(&'static str, PageRender),
    Element(ElementId),
}

/// Builder for a switch view
pub struct Switch<K> {
    cases: Vec<(K, CaseSpec)>,
}

impl<K> Switch<K>
where
    K: Clone + PartialEq + Debug + 'static,
{
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Add a managed page rendered once at mount
    pub fn page(mut self, key: K, tag: &'static str, render: impl FnOnce(&Scope<'_>) + 'static) -> Self {
        self.cases.push((key, CaseSpec::Page(tag, Box::new(render))));
        self
    }

    /// Add a plain element that is only shown or hidden
    pub fn element(mut self, key: K, element: ElementId) -> Self {
        self.cases.push((key, CaseSpec::Element(element)));
        self
    }

    /// Mount the switch under `parent`, driven by `key`
    pub fn mount<O>(
        self,
        tree: &ViewTree,
        parent: Option<ViewId>,
        host: ElementId,
        key: &O,
    ) -> Result<SwitchHandle<K>, ViewError>
    where
        O: Observable<K>,
    {
        let id = tree.create(parent, "switch")?;
        let element = tree.element(id).ok_or(ViewError::UnknownView(id))?;
        tree.with_surface(|surface| surface.append_child(host, element));

        let state = Rc::new(SwitchState {
            id,
            cases: RefCell::new(Vec::with_capacity(self.cases.len())),
            active: Cell::new(None),
        });
        let initial = key.get();
        let mut cases = self.cases;

        tree.render(id, |scope| {
            scope.set_hooks(state.clone());
            for (case_key, spec) in cases.drain(..) {
                let case = match spec {
                    CaseSpec::Page(tag, render) => Case::Page(scope.child(tag, render)),
                    CaseSpec::Element(el) => {
                        scope.tree().with_surface(|surface| surface.append_child(element, el));
                        Case::Element(el)
                    }
                };
                state.cases.borrow_mut().push((case_key, case));
            }

            let active = state.index_of(&initial);
            state.active.set(active);
            for (index, case) in state.cases().into_iter().enumerate() {
                if Some(index) != active {
                    hide(scope.tree(), case);
                }
            }
            if active.is_none() {
                tracing::warn!(switch = ?id, key = ?initial, "no switch case for key");
            }

            let weak_tree = scope.tree().downgrade();
            let weak_state = Rc::downgrade(&state);
            scope.own(key.sub(
                move |next| {
                    if let (Some(tree), Some(state)) = (weak_tree.upgrade(), weak_state.upgrade()) {
                        state.select(&tree, next);
                    }
                },
                false,
            ));
        })?;

        Ok(SwitchHandle { state })
    }
}

impl<K> Default for Switch<K>
where
    K: Clone + PartialEq + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn hide(tree: &ViewTree, case: Case) {
    match case {
        Case::Page(page) => {
            tree.pause(page);
            if let Some(el) = tree.element(page) {
                tree.with_surface(|surface| surface.set_hidden(el, true));
            }
        }
        Case::Element(el) => tree.with_surface(|surface| surface.set_hidden(el, true)),
    }
}

fn show(tree: &ViewTree, case: Case) {
    match case {
        Case::Page(page) => {
            if let Some(el) = tree.element(page) {
                tree.with_surface(|surface| surface.set_hidden(el, false));
            }
            tree.resume(page);
        }
        Case::Element(el) => tree.with_surface(|surface| surface.set_hidden(el, false)),
    }
}

struct SwitchState<K> {
    id: ViewId,
    cases: RefCell<Vec<(K, Case)>>,
    active: Cell<Option<usize>>,
}

impl<K: PartialEq + Debug> SwitchState<K> {
    fn index_of(&self, key: &K) -> Option<usize> {
        self.cases.borrow().iter().position(|(k, _)| k == key)
    }

    fn cases(&self) -> Vec<Case> {
        self.cases.borrow().iter().map(|(_, case)| *case).collect()
    }

    fn select(&self, tree: &ViewTree, key: &K) {
        let next = self.index_of(key);
        let previous = self.active.get();
        if next == previous {
            return;
        }
        let cases = self.cases();

        if let Some(prev) = previous {
            hide(tree, cases[prev]);
        }
        self.active.set(next);
        match next {
            Some(index) => {
                show(tree, cases[index]);
                tracing::debug!(switch = ?self.id, ?key, "switch case shown");
            }
            None => tracing::warn!(switch = ?self.id, ?key, "no switch case for key"),
        }
    }
}

impl<K: PartialEq + Debug> Lifecycle for SwitchState<K> {
    /// Hidden pages stay asleep when the switch resumes
    fn cascades_to(&self, child: ViewId, op: LifecycleOp) -> bool {
        if op != LifecycleOp::Resume {
            return true;
        }
        let active = self.active.get();
        self.cases
            .borrow()
            .iter()
            .position(|(_, case)| *case == Case::Page(child))
            .map_or(true, |index| Some(index) == active)
    }
}

/// Handle to a mounted switch
pub struct SwitchHandle<K> {
    state: Rc<SwitchState<K>>,
}

impl<K: Clone + PartialEq + Debug> SwitchHandle<K> {
    pub fn id(&self) -> ViewId {
        self.state.id
    }

    /// Key of the visible case
    pub fn active_key(&self) -> Option<K> {
        let index = self.state.active.get()?;
        self.state.cases.borrow().get(index).map(|(key, _)| key.clone())
    }

    pub fn active_case(&self) -> Option<Case> {
        let index = self.state.active.get()?;
        self.state.cases.borrow().get(index).map(|(_, case)| *case)
    }

    pub fn case(&self, key: &K) -> Option<Case> {
        let index = self.state.index_of(key)?;
        self.state.cases.borrow().get(index).map(|(_, case)| *case)
    }

    /// View node of a page case
    pub fn page(&self, key: &K) -> Option<ViewId> {
        match self.case(key)? {
            Case::Page(id) => Some(id),
            Case::Element(_) => None,
        }
    }
}

impl<K> Clone for SwitchHandle<K> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}
