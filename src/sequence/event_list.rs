// Sorted event cache
// Mirrors the typed children of a sequence node and re-sorts them lazily

use crate::sequencer::timeline::BeatPosition;
use crate::store::{NodeId, NodeView, Store, StoreChange, StoreListener};
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An event type backed by one store node
pub trait MidiEventType: Clone + Send + Sync + 'static {
    /// Node type this event is read from
    const NODE_TYPE: &'static str;

    /// Reads the event, None when the node is malformed
    fn from_node(view: &NodeView<'_>) -> Option<Self>;

    fn beat_position(&self) -> BeatPosition;
}

struct CacheState<E> {
    needs_sorting: bool,
    sorted: Arc<[E]>,
}

/// Dirty flag and sorted snapshot, shared with readers on other threads
///
/// The lock is only held to flip the flag or swap the snapshot pointer.
pub struct SortedEventCache<E> {
    state: Mutex<CacheState<E>>,
}

impl<E: MidiEventType> SortedEventCache<E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                needs_sorting: true,
                sorted: Arc::from(Vec::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_dirty(&self) {
        self.lock().needs_sorting = true;
    }

    pub fn needs_sorting(&self) -> bool {
        self.lock().needs_sorting
    }

    /// Last published sorted array
    pub fn snapshot(&self) -> Arc<[E]> {
        Arc::clone(&self.lock().sorted)
    }

    fn publish(&self, sorted: Arc<[E]>) {
        let mut state = self.lock();
        state.sorted = sorted;
        state.needs_sorting = false;
    }
}

/// Read-only handle for threads other than the control thread
///
/// Sees either the previous or the next complete sorted array.
pub struct SortedEventReader<E> {
    cache: Arc<SortedEventCache<E>>,
}

impl<E> Clone for SortedEventReader<E> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<E: MidiEventType> SortedEventReader<E> {
    pub fn snapshot(&self) -> Arc<[E]> {
        self.cache.snapshot()
    }
}

/// Live list of events of type `E` under one parent node
pub struct EventList<E> {
    parent: NodeId,
    cache: Arc<SortedEventCache<E>>,
}

impl<E: MidiEventType> EventList<E> {
    /// Creates the list and registers it for changes under `parent`
    pub fn attach(store: &Store, parent: NodeId) -> Rc<Self> {
        let list = Rc::new(Self {
            parent,
            cache: Arc::new(SortedEventCache::new()),
        });

        let weak: Weak<dyn StoreListener> = Rc::downgrade(&list) as Weak<dyn StoreListener>;
        store.add_listener(parent, weak);
        list
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    /// Beat-ordered events, re-sorted first if anything changed
    ///
    /// Events at equal beats keep their store child order.
    pub fn sorted_list(&self, store: &Store) -> Arc<[E]> {
        {
            let state = self.cache.lock();
            if !state.needs_sorting {
                return Arc::clone(&state.sorted);
            }
        }

        let mut events: Vec<E> = store
            .children(self.parent)
            .into_iter()
            .filter_map(|child| {
                store
                    .with_node(child, |view| {
                        if view.has_type(E::NODE_TYPE) {
                            E::from_node(&view)
                        } else {
                            None
                        }
                    })
                    .flatten()
            })
            .collect();

        events.sort_by(|a, b| a.beat_position().total_cmp(&b.beat_position()));
        log::debug!(
            "re-sorted {} {} events under {}",
            events.len(),
            E::NODE_TYPE,
            self.parent
        );

        let sorted: Arc<[E]> = Arc::from(events);
        self.cache.publish(Arc::clone(&sorted));
        sorted
    }

    pub fn needs_sorting(&self) -> bool {
        self.cache.needs_sorting()
    }

    pub fn reader(&self) -> SortedEventReader<E> {
        SortedEventReader {
            cache: Arc::clone(&self.cache),
        }
    }

    fn is_relevant(&self, change: &StoreChange) -> bool {
        match change {
            StoreChange::ChildAdded {
                parent, child_type, ..
            }
            | StoreChange::ChildRemoved {
                parent, child_type, ..
            } => *parent == self.parent && child_type == E::NODE_TYPE,
            StoreChange::ChildOrderChanged { parent, .. } => *parent == self.parent,
            StoreChange::PropertyChanged {
                parent, node_type, ..
            } => *parent == Some(self.parent) && node_type == E::NODE_TYPE,
        }
    }
}

impl<E: MidiEventType> StoreListener for EventList<E> {
    fn store_changed(&self, _store: &Store, change: &StoreChange) {
        if self.is_relevant(change) {
            self.cache.mark_dirty();
        }
    }
}

/// Sorts events by beat position, keeping the order of equal beats
pub fn sort_midi_events_by_time<E: MidiEventType>(events: &mut [E]) {
    events.sort_by(|a, b| a.beat_position().total_cmp(&b.beat_position()));
}
