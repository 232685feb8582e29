use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::tree::{enter, NodeId, StateTree, ViewDescriptor};
use super::StateError;
use crate::events::{Subscribers, Subscription};

/// A completed move between two leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Option<String>,
    pub to: String,
    /// Paths left, deepest first.
    pub exited: Vec<String>,
    /// Paths entered, outermost first.
    pub entered: Vec<String>,
    pub view: Option<ViewDescriptor>,
    pub generation: u64,
}

/// Captured at the start of async work for a state. Once another
/// transition happens the token is stale and results should be dropped.
#[derive(Debug, Clone)]
pub struct TransitionToken {
    generation: u64,
    counter: Arc<AtomicU64>,
}

impl TransitionToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.generation
    }
}

#[derive(Clone)]
pub struct StateManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    tree: StateTree,
    current: Mutex<Option<NodeId>>,
    generation: Arc<AtomicU64>,
    events: Arc<Subscribers<Transition>>,
}

impl StateManager {
    pub fn new(tree: StateTree) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                tree,
                current: Mutex::new(None),
                generation: Arc::new(AtomicU64::new(0)),
                events: Subscribers::new(),
            }),
        }
    }

    pub fn tree(&self) -> &StateTree {
        &self.inner.tree
    }

    /// Enter the root's initial chain.
    pub fn start(&self) -> Transition {
        let tree = &self.inner.tree;
        self.transition_to(enter(tree, tree.root()))
    }

    /// Move to the state at `path`, entering initial children until a leaf
    /// is reached. An unknown path leaves the current state untouched.
    pub fn go_to_state(&self, path: &str) -> Result<Transition, StateError> {
        let tree = &self.inner.tree;
        let target = match tree.resolve(path) {
            Ok(node) => enter(tree, node),
            Err(err) => {
                tracing::error!(path = %path, current = ?self.current_path(), "Unknown state");
                return Err(err);
            }
        };
        Ok(self.transition_to(target))
    }

    fn transition_to(&self, target: NodeId) -> Transition {
        let tree = &self.inner.tree;
        let transition = {
            let mut current = self.inner.current.lock();
            let from = *current;

            let old_chain = from.map(|n| tree.ancestors(n)).unwrap_or_default();
            let new_chain = tree.ancestors(target);
            let shared = old_chain
                .iter()
                .zip(&new_chain)
                .take_while(|(a, b)| a == b)
                .count();

            let exited = old_chain[shared..]
                .iter()
                .rev()
                .map(|n| tree.path(*n))
                .collect();
            let entered = new_chain[shared..].iter().map(|n| tree.path(*n)).collect();

            *current = Some(target);
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            Transition {
                from: from.map(|n| tree.path(n)),
                to: tree.path(target),
                exited,
                entered,
                view: tree.view(target).cloned(),
                generation,
            }
        };

        tracing::info!(
            from = ?transition.from,
            to = %transition.to,
            generation = transition.generation,
            "State transition"
        );
        self.inner.events.emit(&transition);
        transition
    }

    pub fn current(&self) -> Option<NodeId> {
        *self.inner.current.lock()
    }

    pub fn current_path(&self) -> Option<String> {
        self.current().map(|n| self.inner.tree.path(n))
    }

    pub fn current_view(&self) -> Option<ViewDescriptor> {
        self.current()
            .and_then(|n| self.inner.tree.view(n).cloned())
    }

    /// Whether `path` is the active leaf or one of its ancestors.
    pub fn is_active(&self, path: &str) -> bool {
        match (self.current(), self.inner.tree.resolve(path)) {
            (Some(current), Ok(node)) => self.inner.tree.ancestors(current).contains(&node),
            _ => false,
        }
    }

    pub fn token(&self) -> TransitionToken {
        TransitionToken {
            generation: self.inner.generation.load(Ordering::SeqCst),
            counter: self.inner.generation.clone(),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<Transition>
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }
}
