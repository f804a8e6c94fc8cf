//! Enabled/visible flags for nested forms.
//!
//! Nodes form a tree through parent links. A form accepts input only while
//! it and every ancestor are enabled and accepting input, and a form that
//! becomes visible marks its ancestors visible too.
//!
//! Slots of removed nodes are reused. A node must outlive its children;
//! child forms keep their parent form alive to guarantee it.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormNodeId(usize);

#[derive(Debug)]
struct FormNode {
    parent: Option<FormNodeId>,
    enabled: bool,
    visible: bool,
    accepts_input: bool,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Option<FormNode>>,
    free: Vec<usize>,
}

impl Arena {
    fn get(&self, id: FormNodeId) -> Option<&FormNode> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: FormNodeId) -> Option<&mut FormNode> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }
}

/// Shared between a root form and all of its child forms.
#[derive(Clone, Debug, Default)]
pub struct FormRegistry {
    arena: Arc<Mutex<Arena>>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, parent: Option<FormNodeId>) -> FormNodeId {
        let node = FormNode {
            parent,
            enabled: true,
            visible: false,
            accepts_input: true,
        };
        let mut arena = self.arena.lock();
        match arena.free.pop() {
            Some(index) => {
                arena.slots[index] = Some(node);
                FormNodeId(index)
            }
            None => {
                arena.slots.push(Some(node));
                FormNodeId(arena.slots.len() - 1)
            }
        }
    }

    /// Frees the slot of `id` for reuse.
    pub fn remove(&self, id: FormNodeId) {
        let mut arena = self.arena.lock();
        if let Some(slot) = arena.slots.get_mut(id.0) {
            if slot.take().is_some() {
                arena.free.push(id.0);
            }
        }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        let arena = self.arena.lock();
        arena.slots.len() - arena.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self, id: FormNodeId) -> Option<FormNodeId> {
        self.arena.lock().get(id).and_then(|node| node.parent)
    }

    pub fn set_enabled(&self, id: FormNodeId, enabled: bool) {
        if let Some(node) = self.arena.lock().get_mut(id) {
            node.enabled = enabled;
        }
    }

    pub fn is_enabled(&self, id: FormNodeId) -> bool {
        self.arena.lock().get(id).is_some_and(|node| node.enabled)
    }

    pub(crate) fn set_accepts_input(&self, id: FormNodeId, accepts_input: bool) {
        if let Some(node) = self.arena.lock().get_mut(id) {
            node.accepts_input = accepts_input;
        }
    }

    /// Whether `id` and all of its ancestors accept input.
    pub fn is_input_enabled(&self, id: FormNodeId) -> bool {
        let arena = self.arena.lock();
        let mut current = Some(id);
        while let Some(id) = current {
            match arena.get(id) {
                Some(node) if node.enabled && node.accepts_input => current = node.parent,
                _ => return false,
            }
        }
        true
    }

    /// Marks `id` and its ancestors visible. Visibility never resets.
    pub fn mark_visible(&self, id: FormNodeId) {
        let mut arena = self.arena.lock();
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(node) = arena.get_mut(id) else {
                return;
            };
            if node.visible {
                return;
            }
            node.visible = true;
            current = node.parent;
        }
    }

    pub fn is_visible(&self, id: FormNodeId) -> bool {
        self.arena.lock().get(id).is_some_and(|node| node.visible)
    }
}
