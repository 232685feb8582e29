//! Hierarchical application states.
//!
//! A [`StateTree`] is built once from [`StateNode`] builders and validated
//! up front. The [`StateManager`] holds the single active leaf and moves it
//! with [`StateManager::go_to_state`].

mod manager;
mod tree;

use thiserror::Error;

pub use manager::{StateManager, Transition, TransitionToken};
pub use tree::{enter, NodeId, StateNode, StateTree, ViewDescriptor};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Unknown state '{path}'")]
    UnknownState { path: String },

    #[error("State '{parent}' has two children named '{name}'")]
    DuplicateState { parent: String, name: String },

    #[error("Initial state '{initial}' is not a child of '{state}'")]
    UnknownInitial { state: String, initial: String },

    #[error("State '{state}' has children but no initial state")]
    MissingInitial { state: String },

    #[error("No view connected for '{view}'")]
    MissingView { view: String },
}
