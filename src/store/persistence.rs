// Persistence - Node tree snapshots
// Serializable copies of store subtrees, used for RON files and deep copies

use crate::store::{NodeId, Store, Value};
use ron::{from_str as ron_from_str, to_string as ron_to_string};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to serialize to RON: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Failed to deserialize from RON: {0}")]
    Deserialize(#[from] ron::error::SpannedError),

    #[error("Node {0} does not exist")]
    MissingNode(NodeId),

    #[error("Expected a {expected} node, found {found}")]
    WrongNodeType { expected: String, found: String },
}

/// Owned copy of a node, its properties and its children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    pub fn new(node_type: &str) -> Self {
        Self {
            node_type: node_type.to_string(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Copies the subtree rooted at `id`
    pub fn capture(store: &Store, id: NodeId) -> Option<Self> {
        let (node_type, properties, children) = store.with_node(id, |view| {
            (
                view.node_type().to_string(),
                view.properties()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect::<BTreeMap<_, _>>(),
                view.children().to_vec(),
            )
        })?;

        Some(Self {
            node_type,
            properties,
            children: children
                .into_iter()
                .filter_map(|child| Self::capture(store, child))
                .collect(),
        })
    }

    /// Creates a detached copy of this subtree in `store`
    pub fn instantiate(&self, store: &Store) -> NodeId {
        let id = store.create_node(&self.node_type);
        for (name, value) in &self.properties {
            store.apply_property(id, name, Some(value.clone()));
        }
        for child in &self.children {
            let child_id = child.instantiate(store);
            store.insert_child(id, child_id, None);
        }
        id
    }

    pub fn to_ron(&self) -> Result<String, PersistenceError> {
        Ok(ron_to_string(self)?)
    }

    pub fn from_ron(ron_data: &str) -> Result<Self, PersistenceError> {
        Ok(ron_from_str(ron_data)?)
    }
}

/// Deep-copies a node (possibly across stores), returning the detached copy
pub fn copy_node(source: &Store, id: NodeId, destination: &Store) -> Option<NodeId> {
    NodeSnapshot::capture(source, id).map(|snapshot| snapshot.instantiate(destination))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree(store: &Store) -> NodeId {
        let seq = store.create_node("SEQUENCE");
        store.set_property(seq, "channelNumber", 3, None);
        for i in 0..3 {
            let note = store.create_node("NOTE");
            store.set_property(note, "p", 60 + i, None);
            store.set_property(note, "b", i as f64 * 0.5, None);
            store.add_child(seq, note, None, None);
        }
        seq
    }

    #[test]
    fn test_capture_and_instantiate() {
        let store = Store::new();
        let seq = build_tree(&store);

        let snapshot = NodeSnapshot::capture(&store, seq).unwrap();
        assert_eq!(snapshot.children.len(), 3);

        let other = Store::new();
        let copy = snapshot.instantiate(&other);
        assert_eq!(other.get_i64(copy, "channelNumber"), Some(3));
        let notes = other.children(copy);
        assert_eq!(notes.len(), 3);
        assert_eq!(other.get_f64(notes[2], "b"), Some(1.0));
        assert_eq!(NodeSnapshot::capture(&other, copy), Some(snapshot));
    }

    #[test]
    fn test_ron_round_trip() {
        let store = Store::new();
        let seq = build_tree(&store);
        let data = store.create_node("SYSEX");
        store.set_property(data, "data", vec![0xF0u8, 0x01, 0xF7], None);
        store.add_child(seq, data, None, None);

        let snapshot = NodeSnapshot::capture(&store, seq).unwrap();
        let ron_data = snapshot.to_ron().unwrap();
        let restored = NodeSnapshot::from_ron(&ron_data).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_invalid_ron() {
        assert!(matches!(
            NodeSnapshot::from_ron("not ron at all ("),
            Err(PersistenceError::Deserialize(_))
        ));
    }

    #[test]
    fn test_copy_missing_node() {
        let store = Store::new();
        let id = store.create_node("NOTE");
        store.delete_node(id);
        assert!(copy_node(&store, id, &Store::new()).is_none());
    }
}
