// Store - Observable node tree
// Typed properties, child lists and change notifications, integrated with the undo manager

pub mod ids;
pub mod persistence;
pub mod undo;

pub use persistence::{NodeSnapshot, PersistenceError};
pub use undo::{StoreAction, UndoError, UndoManager};

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Generational handle to a node in a [`Store`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Typed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(f) if f.is_finite() => Some(f.round() as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Change delivered to listeners of a node and all its ancestors
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    ChildAdded {
        parent: NodeId,
        child: NodeId,
        child_type: String,
    },
    ChildRemoved {
        parent: NodeId,
        child: NodeId,
        index: usize,
        child_type: String,
    },
    ChildOrderChanged {
        parent: NodeId,
        old_index: usize,
        new_index: usize,
    },
    PropertyChanged {
        node: NodeId,
        parent: Option<NodeId>,
        node_type: String,
        property: String,
    },
}

impl StoreChange {
    /// Node whose listeners (and ancestors' listeners) are notified
    fn origin(&self) -> NodeId {
        match self {
            StoreChange::ChildAdded { parent, .. }
            | StoreChange::ChildRemoved { parent, .. }
            | StoreChange::ChildOrderChanged { parent, .. } => *parent,
            StoreChange::PropertyChanged { node, .. } => *node,
        }
    }
}

/// Observer of store changes
///
/// Called after the change has been applied, with no internal borrow held,
/// so listeners may read from the store.
pub trait StoreListener {
    fn store_changed(&self, store: &Store, change: &StoreChange);
}

struct Node {
    node_type: String,
    properties: BTreeMap<String, Value>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    listeners: Vec<Weak<dyn StoreListener>>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Default)]
struct StoreData {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl StoreData {
    fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let Some(slot) = self
                .slots
                .get_mut(next.index as usize)
                .filter(|slot| slot.generation == next.generation)
            else {
                continue;
            };

            if let Some(node) = slot.node.take() {
                pending.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(next.index);
            }
        }
    }

    fn collect_listeners(&mut self, origin: NodeId) -> Vec<Rc<dyn StoreListener>> {
        let mut listeners = Vec::new();
        let mut current = Some(origin);

        while let Some(id) = current {
            let Some(node) = self.get_mut(id) else {
                break;
            };
            node.listeners.retain(|l| l.strong_count() > 0);
            listeners.extend(node.listeners.iter().filter_map(Weak::upgrade));
            current = node.parent;
        }

        listeners
    }
}

/// Read-only view of one node, valid while the store is borrowed
pub struct NodeView<'a> {
    id: NodeId,
    node: &'a Node,
}

impl<'a> NodeView<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node_type(&self) -> &str {
        &self.node.node_type
    }

    pub fn has_type(&self, node_type: &str) -> bool {
        self.node.node_type == node_type
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.node.properties.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.property(name).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.property(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.property(name).and_then(Value::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(Value::as_str)
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.property(name).and_then(Value::as_bytes)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.node.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn children(&self) -> &[NodeId] {
        &self.node.children
    }
}

/// Shared handle to a node tree
///
/// Cloning is cheap and yields another handle to the same tree. The store is
/// owned by a single control thread.
#[derive(Clone, Default)]
pub struct Store {
    data: Rc<RefCell<StoreData>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if both handles refer to the same tree
    pub fn same_as(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Creates a detached node
    pub fn create_node(&self, node_type: &str) -> NodeId {
        self.data.borrow_mut().allocate(Node {
            node_type: node_type.to_string(),
            properties: BTreeMap::new(),
            children: Vec::new(),
            parent: None,
            listeners: Vec::new(),
        })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.data.borrow().get(id).is_some()
    }

    /// Runs `f` against a view of the node
    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(NodeView<'_>) -> R) -> Option<R> {
        let data = self.data.borrow();
        data.get(id).map(|node| f(NodeView { id, node }))
    }

    pub fn node_type(&self, id: NodeId) -> Option<String> {
        self.with_node(id, |v| v.node_type().to_string())
    }

    pub fn has_type(&self, id: NodeId, node_type: &str) -> bool {
        self.with_node(id, |v| v.has_type(node_type)).unwrap_or(false)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data.borrow().get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.with_node(id, |v| v.children().to_vec())
            .unwrap_or_default()
    }

    pub fn num_children(&self, id: NodeId) -> usize {
        self.with_node(id, |v| v.children().len()).unwrap_or(0)
    }

    pub fn children_of_type(&self, id: NodeId, node_type: &str) -> Vec<NodeId> {
        let data = self.data.borrow();
        data.get(id)
            .map(|node| {
                node.children
                    .iter()
                    .copied()
                    .filter(|c| data.get(*c).is_some_and(|n| n.node_type == node_type))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn first_child_of_type(&self, id: NodeId, node_type: &str) -> Option<NodeId> {
        self.children_of_type(id, node_type).into_iter().next()
    }

    pub fn child_index(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.with_node(parent, |v| v.children().iter().position(|c| *c == child))
            .flatten()
    }

    pub fn property(&self, id: NodeId, name: &str) -> Option<Value> {
        self.with_node(id, |v| v.property(name).cloned()).flatten()
    }

    pub fn get_bool(&self, id: NodeId, name: &str) -> Option<bool> {
        self.with_node(id, |v| v.get_bool(name)).flatten()
    }

    pub fn get_i64(&self, id: NodeId, name: &str) -> Option<i64> {
        self.with_node(id, |v| v.get_i64(name)).flatten()
    }

    pub fn get_f64(&self, id: NodeId, name: &str) -> Option<f64> {
        self.with_node(id, |v| v.get_f64(name)).flatten()
    }

    pub fn get_string(&self, id: NodeId, name: &str) -> Option<String> {
        self.with_node(id, |v| v.get_str(name).map(str::to_string))
            .flatten()
    }

    /// Registers a listener on `id`. It also hears about changes to every descendant.
    pub fn add_listener(&self, id: NodeId, listener: Weak<dyn StoreListener>) {
        if let Some(node) = self.data.borrow_mut().get_mut(id) {
            node.listeners.push(listener);
        }
    }

    pub fn set_property(
        &self,
        id: NodeId,
        name: &str,
        value: impl Into<Value>,
        um: Option<&mut UndoManager>,
    ) {
        self.write_property(id, name, Some(value.into()), um);
    }

    pub fn remove_property(&self, id: NodeId, name: &str, um: Option<&mut UndoManager>) {
        self.write_property(id, name, None, um);
    }

    fn write_property(
        &self,
        id: NodeId,
        name: &str,
        value: Option<Value>,
        um: Option<&mut UndoManager>,
    ) {
        let Some(old) = self.apply_property(id, name, value.clone()) else {
            return;
        };

        if let Some(um) = um {
            um.record(StoreAction::SetProperty {
                node: id,
                property: name.to_string(),
                old,
                new: value,
            });
        }
    }

    /// Sets or clears a property without recording. Returns the previous value,
    /// or None when nothing changed.
    pub(crate) fn apply_property(
        &self,
        id: NodeId,
        name: &str,
        value: Option<Value>,
    ) -> Option<Option<Value>> {
        let (change, listeners, old) = {
            let mut data = self.data.borrow_mut();
            let node = data.get_mut(id)?;

            let current = node.properties.get(name);
            if current == value.as_ref() {
                return None;
            }

            let old = match value {
                Some(v) => node.properties.insert(name.to_string(), v),
                None => node.properties.remove(name),
            };

            let change = StoreChange::PropertyChanged {
                node: id,
                parent: node.parent,
                node_type: node.node_type.clone(),
                property: name.to_string(),
            };
            let listeners = data.collect_listeners(change.origin());
            (change, listeners, old)
        };

        self.dispatch(&change, listeners);
        Some(old)
    }

    /// Attaches a detached node. `index` of None appends.
    pub fn add_child(
        &self,
        parent: NodeId,
        child: NodeId,
        index: Option<usize>,
        um: Option<&mut UndoManager>,
    ) {
        let Some(index) = self.insert_child(parent, child, index) else {
            return;
        };

        if let Some(um) = um {
            um.record(StoreAction::AddChild {
                parent,
                child,
                index,
            });
        }
    }

    /// Detaches `child`. Without an undo manager the subtree is freed, otherwise
    /// it is retained so the removal can be undone.
    pub fn remove_child(&self, parent: NodeId, child: NodeId, um: Option<&mut UndoManager>) {
        let Some(index) = self.detach_child(parent, child) else {
            return;
        };

        match um {
            Some(um) => um.record(StoreAction::RemoveChild {
                parent,
                child,
                index,
            }),
            None => self.data.borrow_mut().free_subtree(child),
        }
    }

    /// Removes every child of `parent` with the given type
    pub fn remove_children_of_type(
        &self,
        parent: NodeId,
        node_type: &str,
        mut um: Option<&mut UndoManager>,
    ) {
        for child in self.children_of_type(parent, node_type).into_iter().rev() {
            self.remove_child(parent, child, um.as_deref_mut());
        }
    }

    pub fn move_child(
        &self,
        parent: NodeId,
        from: usize,
        to: usize,
        um: Option<&mut UndoManager>,
    ) {
        if !self.reorder_child(parent, from, to) {
            return;
        }

        if let Some(um) = um {
            um.record(StoreAction::MoveChild { parent, from, to });
        }
    }

    /// Frees a detached node and its subtree
    pub fn delete_node(&self, id: NodeId) {
        let mut data = self.data.borrow_mut();
        if data.get(id).is_some_and(|n| n.parent.is_none()) {
            data.free_subtree(id);
        }
    }

    pub(crate) fn insert_child(
        &self,
        parent: NodeId,
        child: NodeId,
        index: Option<usize>,
    ) -> Option<usize> {
        if parent == child || self.is_ancestor_of(child, parent) {
            return None;
        }

        let (change, listeners, index) = {
            let mut data = self.data.borrow_mut();
            let child_node = data.get(child)?;
            if child_node.parent.is_some() {
                return None;
            }
            let child_type = child_node.node_type.clone();

            let parent_node = data.get_mut(parent)?;
            let index = index
                .unwrap_or(parent_node.children.len())
                .min(parent_node.children.len());
            parent_node.children.insert(index, child);

            if let Some(child_node) = data.get_mut(child) {
                child_node.parent = Some(parent);
            }

            let change = StoreChange::ChildAdded {
                parent,
                child,
                child_type,
            };
            let listeners = data.collect_listeners(parent);
            (change, listeners, index)
        };

        self.dispatch(&change, listeners);
        Some(index)
    }

    pub(crate) fn detach_child(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        let (change, listeners, index) = {
            let mut data = self.data.borrow_mut();
            let parent_node = data.get_mut(parent)?;
            let index = parent_node.children.iter().position(|c| *c == child)?;
            parent_node.children.remove(index);

            let child_node = data.get_mut(child)?;
            child_node.parent = None;
            let child_type = child_node.node_type.clone();

            let change = StoreChange::ChildRemoved {
                parent,
                child,
                index,
                child_type,
            };
            let listeners = data.collect_listeners(parent);
            (change, listeners, index)
        };

        self.dispatch(&change, listeners);
        Some(index)
    }

    pub(crate) fn reorder_child(&self, parent: NodeId, from: usize, to: usize) -> bool {
        let (change, listeners) = {
            let mut data = self.data.borrow_mut();
            let Some(node) = data.get_mut(parent) else {
                return false;
            };
            if from >= node.children.len() || from == to {
                return false;
            }

            let to = to.min(node.children.len() - 1);
            let child = node.children.remove(from);
            node.children.insert(to, child);

            let change = StoreChange::ChildOrderChanged {
                parent,
                old_index: from,
                new_index: to,
            };
            let listeners = data.collect_listeners(parent);
            (change, listeners)
        };

        self.dispatch(&change, listeners);
        true
    }

    fn is_ancestor_of(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    fn dispatch(&self, change: &StoreChange, listeners: Vec<Rc<dyn StoreListener>>) {
        for listener in listeners {
            listener.store_changed(self, change);
        }
    }

    /// Number of live nodes, attached or not
    pub fn num_nodes(&self) -> usize {
        self.data
            .borrow()
            .slots
            .iter()
            .filter(|s| s.node.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingListener {
        count: Cell<usize>,
        last: RefCell<Option<StoreChange>>,
    }

    impl CountingListener {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                count: Cell::new(0),
                last: RefCell::new(None),
            })
        }
    }

    impl StoreListener for CountingListener {
        fn store_changed(&self, _store: &Store, change: &StoreChange) {
            self.count.set(self.count.get() + 1);
            *self.last.borrow_mut() = Some(change.clone());
        }
    }

    #[test]
    fn test_properties() {
        let store = Store::new();
        let node = store.create_node("NOTE");
        store.set_property(node, "p", 60, None);
        store.set_property(node, "b", 1.5, None);

        assert_eq!(store.get_i64(node, "p"), Some(60));
        assert_eq!(store.get_f64(node, "b"), Some(1.5));
        assert_eq!(store.get_f64(node, "p"), Some(60.0));
        assert_eq!(store.get_string(node, "p"), None);

        store.remove_property(node, "p", None);
        assert_eq!(store.property(node, "p"), None);
    }

    #[test]
    fn test_children() {
        let store = Store::new();
        let parent = store.create_node("SEQUENCE");
        let a = store.create_node("NOTE");
        let b = store.create_node("CONTROL");
        store.add_child(parent, a, None, None);
        store.add_child(parent, b, Some(0), None);

        assert_eq!(store.children(parent), vec![b, a]);
        assert_eq!(store.children_of_type(parent, "NOTE"), vec![a]);
        assert_eq!(store.parent(a), Some(parent));

        store.move_child(parent, 0, 1, None);
        assert_eq!(store.children(parent), vec![a, b]);

        store.remove_child(parent, a, None);
        assert!(!store.contains(a));
        assert_eq!(store.num_children(parent), 1);
    }

    #[test]
    fn test_stale_ids_are_rejected() {
        let store = Store::new();
        let a = store.create_node("NOTE");
        store.delete_node(a);
        let b = store.create_node("NOTE");

        assert!(!store.contains(a));
        assert!(store.contains(b));
        store.set_property(a, "p", 1, None);
        assert_eq!(store.get_i64(b, "p"), None);
    }

    #[test]
    fn test_cannot_attach_twice_or_create_cycles() {
        let store = Store::new();
        let root = store.create_node("ROOT");
        let child = store.create_node("CHILD");
        store.add_child(root, child, None, None);
        store.add_child(root, child, None, None);
        assert_eq!(store.num_children(root), 1);

        store.add_child(child, root, None, None);
        assert_eq!(store.num_children(child), 0);
    }

    #[test]
    fn test_notifications_reach_ancestors() {
        let store = Store::new();
        let root = store.create_node("ROOT");
        let seq = store.create_node("SEQUENCE");
        store.add_child(root, seq, None, None);

        let listener = CountingListener::new();
        let weak: Weak<dyn StoreListener> = Rc::downgrade(&listener) as Weak<dyn StoreListener>;
        store.add_listener(root, weak);

        let note = store.create_node("NOTE");
        store.add_child(seq, note, None, None);
        assert_eq!(listener.count.get(), 1);

        store.set_property(note, "p", 64, None);
        assert_eq!(listener.count.get(), 2);
        assert_eq!(
            *listener.last.borrow(),
            Some(StoreChange::PropertyChanged {
                node: note,
                parent: Some(seq),
                node_type: "NOTE".into(),
                property: "p".into(),
            })
        );

        // Same value is not a change
        store.set_property(note, "p", 64, None);
        assert_eq!(listener.count.get(), 2);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let store = Store::new();
        let root = store.create_node("ROOT");
        let listener = CountingListener::new();
        store.add_listener(root, Rc::downgrade(&listener) as Weak<dyn StoreListener>);
        drop(listener);

        store.set_property(root, "name", "x", None);
        assert_eq!(store.get_string(root, "name").as_deref(), Some("x"));
    }
}
