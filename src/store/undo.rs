// UndoManager - Transactional undo/redo over store mutations

use crate::store::{NodeId, Store, Value};
use std::collections::VecDeque;
use thiserror::Error;

/// Default maximum number of transactions to keep in history
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Errors that can occur while undoing or redoing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UndoError {
    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("Node {0} no longer exists")]
    StaleNode(NodeId),
}

/// One recorded store mutation
#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    SetProperty {
        node: NodeId,
        property: String,
        old: Option<Value>,
        new: Option<Value>,
    },
    AddChild {
        parent: NodeId,
        child: NodeId,
        index: usize,
    },
    RemoveChild {
        parent: NodeId,
        child: NodeId,
        index: usize,
    },
    MoveChild {
        parent: NodeId,
        from: usize,
        to: usize,
    },
}

impl StoreAction {
    pub fn description(&self) -> String {
        match self {
            StoreAction::SetProperty { property, .. } => format!("Change {}", property),
            StoreAction::AddChild { .. } => "Add item".to_string(),
            StoreAction::RemoveChild { .. } => "Remove item".to_string(),
            StoreAction::MoveChild { .. } => "Move item".to_string(),
        }
    }

    fn inverse(&self) -> StoreAction {
        match self.clone() {
            StoreAction::SetProperty {
                node,
                property,
                old,
                new,
            } => StoreAction::SetProperty {
                node,
                property,
                old: new,
                new: old,
            },
            StoreAction::AddChild {
                parent,
                child,
                index,
            } => StoreAction::RemoveChild {
                parent,
                child,
                index,
            },
            StoreAction::RemoveChild {
                parent,
                child,
                index,
            } => StoreAction::AddChild {
                parent,
                child,
                index,
            },
            StoreAction::MoveChild { parent, from, to } => StoreAction::MoveChild {
                parent,
                from: to,
                to: from,
            },
        }
    }

    /// Applies the action without recording it
    fn apply(&self, store: &Store) -> Result<(), UndoError> {
        match self {
            StoreAction::SetProperty {
                node,
                property,
                new,
                ..
            } => {
                if !store.contains(*node) {
                    return Err(UndoError::StaleNode(*node));
                }
                store.apply_property(*node, property, new.clone());
            }
            StoreAction::AddChild {
                parent,
                child,
                index,
            } => {
                for id in [*parent, *child] {
                    if !store.contains(id) {
                        return Err(UndoError::StaleNode(id));
                    }
                }
                store.insert_child(*parent, *child, Some(*index));
            }
            StoreAction::RemoveChild { parent, child, .. } => {
                if !store.contains(*child) {
                    return Err(UndoError::StaleNode(*child));
                }
                store.detach_child(*parent, *child);
            }
            StoreAction::MoveChild { parent, from, to } => {
                if !store.contains(*parent) {
                    return Err(UndoError::StaleNode(*parent));
                }
                store.reorder_child(*parent, *from, *to);
            }
        }

        log::trace!("applied {:?}", self);
        Ok(())
    }
}

/// A named group of actions undone and redone as one step
#[derive(Debug, Clone)]
struct Transaction {
    description: String,
    actions: Vec<StoreAction>,
}

/// Manages transactions and undo/redo functionality
///
/// Store mutations called with an undo manager record their inverse here.
/// Actions recorded between `begin_transaction` and the matching
/// `end_transaction` form one undo step; transactions may nest, only the
/// outermost one is committed. An action recorded outside a transaction is
/// its own step.
///
/// # Memory Management
/// The manager limits the number of transactions in the undo stack. When the
/// limit is reached, the oldest transaction is removed.
pub struct UndoManager {
    /// Transactions that can be undone (most recent at the back)
    undo_stack: VecDeque<Transaction>,

    /// Transactions that can be redone (most recent at the back)
    redo_stack: VecDeque<Transaction>,

    pending: Option<Transaction>,
    depth: usize,
    max_history: usize,
}

impl UndoManager {
    /// Create a new UndoManager with default settings
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HISTORY)
    }

    /// Create a new UndoManager with a custom history limit
    pub fn with_capacity(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_history),
            redo_stack: VecDeque::with_capacity(max_history),
            pending: None,
            depth: 0,
            max_history: max_history.max(1),
        }
    }

    /// Opens a transaction. Nested calls join the outer transaction.
    pub fn begin_transaction(&mut self, description: &str) {
        if self.depth == 0 {
            self.pending = Some(Transaction {
                description: description.to_string(),
                actions: Vec::new(),
            });
        }
        self.depth += 1;
    }

    /// Closes a transaction, committing it when it is the outermost one
    pub fn end_transaction(&mut self) {
        if self.depth == 0 {
            return;
        }

        self.depth -= 1;
        if self.depth == 0 {
            self.commit_pending();
        }
    }

    pub fn is_in_transaction(&self) -> bool {
        self.depth > 0
    }

    pub(crate) fn record(&mut self, action: StoreAction) {
        match self.pending.as_mut() {
            Some(transaction) => transaction.actions.push(action),
            None => {
                let description = action.description();
                self.push_undo(Transaction {
                    description,
                    actions: vec![action],
                });
            }
        }
    }

    fn commit_pending(&mut self) {
        if let Some(transaction) = self.pending.take() {
            if !transaction.actions.is_empty() {
                self.push_undo(transaction);
            }
        }
    }

    fn push_undo(&mut self, transaction: Transaction) {
        self.undo_stack.push_back(transaction);

        // Clear redo stack (we're on a new timeline now)
        self.redo_stack.clear();

        // Trim history if needed
        if self.undo_stack.len() > self.max_history {
            self.undo_stack.pop_front();
        }
    }

    /// Undo the last transaction, returning its description
    ///
    /// An open transaction is committed first.
    pub fn undo(&mut self, store: &Store) -> Result<String, UndoError> {
        self.depth = 0;
        self.commit_pending();

        let transaction = self.undo_stack.pop_back().ok_or(UndoError::NothingToUndo)?;

        for action in transaction.actions.iter().rev() {
            action.inverse().apply(store)?;
        }

        let description = transaction.description.clone();
        self.redo_stack.push_back(transaction);
        Ok(description)
    }

    /// Redo the last undone transaction, returning its description
    pub fn redo(&mut self, store: &Store) -> Result<String, UndoError> {
        let transaction = self.redo_stack.pop_back().ok_or(UndoError::NothingToRedo)?;

        for action in &transaction.actions {
            action.apply(store)?;
        }

        let description = transaction.description.clone();
        self.undo_stack.push_back(transaction);
        Ok(description)
    }

    /// Check if there are transactions that can be undone
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty() || self.pending.as_ref().is_some_and(|t| !t.actions.is_empty())
    }

    /// Check if there are transactions that can be redone
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|t| t.description.clone())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|t| t.description.clone())
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.pending = None;
        self.depth = 0;
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` inside one transaction when an undo manager is supplied
pub fn in_transaction<R>(
    um: Option<&mut UndoManager>,
    description: &str,
    f: impl FnOnce(Option<&mut UndoManager>) -> R,
) -> R {
    match um {
        Some(um) => {
            um.begin_transaction(description);
            let result = f(Some(&mut *um));
            um.end_transaction();
            result
        }
        None => f(None),
    }
}
