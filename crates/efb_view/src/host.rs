//! Host surface abstraction
//!
//! Views never own pixels. They create and arrange elements on a
//! [`HostSurface`], the narrow interface the instrument's real UI toolkit
//! implements. [`MemorySurface`] is the in-memory implementation used by the
//! headless binary and by tests, with helpers to inspect what a user would
//! see.

use slotmap::{new_key_type, Key, SlotMap};
use std::fmt::Write as _;

new_key_type! {
    /// Handle to an element on a host surface
    pub struct ElementId;
}

impl ElementId {
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }
}

/// Element tree operations a view needs from its host
pub trait HostSurface {
    /// Create a detached element
    fn create_element(&mut self, tag: &str) -> ElementId;

    /// Attach `child` as the last child of `parent`, detaching it from any
    /// previous parent first
    fn append_child(&mut self, parent: ElementId, child: ElementId);

    /// Attach `child` right after `anchor` inside `parent`; `None` inserts at
    /// the front
    fn insert_after(&mut self, parent: ElementId, anchor: Option<ElementId>, child: ElementId);

    /// Detach an element (and its subtree) from its parent; it can be
    /// attached again later
    fn remove(&mut self, element: ElementId);

    fn set_hidden(&mut self, element: ElementId, hidden: bool);

    fn set_text(&mut self, element: ElementId, text: &str);

    /// Free an element and its subtree for good
    fn release(&mut self, element: ElementId) {
        self.remove(element);
    }
}

#[derive(Clone, Debug, Default)]
struct MemElement {
    tag: String,
    text: String,
    hidden: bool,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

/// In-memory element tree
#[derive(Debug)]
pub struct MemorySurface {
    elements: SlotMap<ElementId, MemElement>,
    root: ElementId,
}

impl MemorySurface {
    pub fn new() -> Self {
        let mut elements = SlotMap::with_key();
        let root = elements.insert(MemElement {
            tag: "root".to_string(),
            ..MemElement::default()
        });
        Self { elements, root }
    }

    /// The root element every screen attaches to
    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn contains(&self, element: ElementId) -> bool {
        self.elements.contains_key(element)
    }

    /// Number of live elements, root included
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn tag(&self, element: ElementId) -> Option<&str> {
        self.elements.get(element).map(|e| e.tag.as_str())
    }

    pub fn text(&self, element: ElementId) -> Option<&str> {
        self.elements.get(element).map(|e| e.text.as_str())
    }

    pub fn is_hidden(&self, element: ElementId) -> bool {
        self.elements.get(element).is_some_and(|e| e.hidden)
    }

    pub fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.elements.get(element).and_then(|e| e.parent)
    }

    pub fn children(&self, element: ElementId) -> &[ElementId] {
        self.elements
            .get(element)
            .map(|e| e.children.as_slice())
            .unwrap_or_default()
    }

    /// Whether the element is attached under the root and neither it nor
    /// any ancestor is hidden
    pub fn is_visible(&self, element: ElementId) -> bool {
        let mut current = Some(element);
        while let Some(id) = current {
            let Some(el) = self.elements.get(id) else {
                return false;
            };
            if el.hidden {
                return false;
            }
            if id == self.root {
                return true;
            }
            current = el.parent;
        }
        false
    }

    /// Texts of the element's visible descendants, in document order
    pub fn visible_texts(&self, element: ElementId) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_texts(element, &mut out);
        out
    }

    fn collect_texts(&self, element: ElementId, out: &mut Vec<String>) {
        let Some(el) = self.elements.get(element) else {
            return;
        };
        if el.hidden {
            return;
        }
        if !el.text.is_empty() {
            out.push(el.text.clone());
        }
        for child in &el.children {
            self.collect_texts(*child, out);
        }
    }

    /// Indented outline of the visible tree under `element`
    pub fn outline(&self, element: ElementId) -> String {
        let mut out = String::new();
        self.write_outline(element, 0, &mut out);
        out
    }

    fn write_outline(&self, element: ElementId, depth: usize, out: &mut String) {
        let Some(el) = self.elements.get(element) else {
            return;
        };
        if el.hidden {
            return;
        }
        let _ = write!(out, "{:indent$}<{}>", "", el.tag, indent = depth * 2);
        if !el.text.is_empty() {
            let _ = write!(out, " {}", el.text);
        }
        out.push('\n');
        for child in &el.children {
            self.write_outline(*child, depth + 1, out);
        }
    }

    fn detach(&mut self, element: ElementId) {
        let Some(parent) = self.elements.get_mut(element).and_then(|e| e.parent.take()) else {
            return;
        };
        if let Some(p) = self.elements.get_mut(parent) {
            p.children.retain(|c| *c != element);
        }
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSurface for MemorySurface {
    fn create_element(&mut self, tag: &str) -> ElementId {
        self.elements.insert(MemElement {
            tag: tag.to_string(),
            ..MemElement::default()
        })
    }

    fn append_child(&mut self, parent: ElementId, child: ElementId) {
        if !self.elements.contains_key(parent) || !self.elements.contains_key(child) {
            tracing::warn!(?parent, ?child, "append_child on a released element");
            return;
        }
        self.detach(child);
        self.elements[parent].children.push(child);
        self.elements[child].parent = Some(parent);
    }

    fn insert_after(&mut self, parent: ElementId, anchor: Option<ElementId>, child: ElementId) {
        if !self.elements.contains_key(parent) || !self.elements.contains_key(child) {
            tracing::warn!(?parent, ?child, "insert_after on a released element");
            return;
        }
        self.detach(child);
        let siblings = &mut self.elements[parent].children;
        let index = match anchor {
            None => 0,
            Some(anchor) => match siblings.iter().position(|c| *c == anchor) {
                Some(pos) => pos + 1,
                None => {
                    tracing::warn!(?anchor, "insert_after anchor is not a child; appending");
                    siblings.len()
                }
            },
        };
        siblings.insert(index, child);
        self.elements[child].parent = Some(parent);
    }

    fn remove(&mut self, element: ElementId) {
        self.detach(element);
    }

    fn set_hidden(&mut self, element: ElementId, hidden: bool) {
        if let Some(el) = self.elements.get_mut(element) {
            el.hidden = hidden;
        }
    }

    fn set_text(&mut self, element: ElementId, text: &str) {
        if let Some(el) = self.elements.get_mut(element) {
            el.text.clear();
            el.text.push_str(text);
        }
    }

    fn release(&mut self, element: ElementId) {
        if element == self.root {
            return;
        }
        self.detach(element);
        let mut stack = vec![element];
        while let Some(id) = stack.pop() {
            if let Some(el) = self.elements.remove(id) {
                stack.extend(el.children);
            }
        }
    }
}
