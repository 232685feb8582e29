//! Explicit application context.
//!
//! Everything a running application needs is reachable from one
//! [`AppContext`] value passed to whoever needs it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::adapter::{Adapter, AdapterError, ResourceMapping, RestAdapter};
use crate::config::{Config, ConfigError};
use crate::schema::{Registry, SchemaError};
use crate::state::{StateError, StateManager, StateTree, Transition};
use crate::store::{Store, StoreError};
use crate::view::{ArrayController, Outlet};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Registry, REST adapter and store described by `config`.
pub fn build_store(config: &Config) -> Result<Store, AppError> {
    config.validate()?;
    let registry = Registry::from_config(&config.models)?;
    let mapping = ResourceMapping::from_config(&config.resources);
    let adapter: Arc<dyn Adapter> = Arc::new(RestAdapter::from_config(&config.adapter, mapping)?);
    tracing::debug!(base_url = %config.adapter.base_url, models = registry.len(), "Building store");
    Ok(Store::new(Arc::new(registry), adapter))
}

/// Result of [`AppContext::load_for_state`].
#[derive(Debug)]
pub struct StateLoad {
    pub transition: Transition,
    /// False when another transition happened while loading and the
    /// result was dropped.
    pub applied: bool,
}

#[derive(Clone)]
pub struct AppContext {
    store: Store,
    states: StateManager,
    outlet: Outlet,
    controllers: Arc<Mutex<HashMap<String, ArrayController>>>,
}

impl AppContext {
    /// Wire the pieces together and enter the initial state chain.
    pub fn new(store: Store, states: StateManager) -> Self {
        states.start();
        Self {
            store,
            states,
            outlet: Outlet::new(),
            controllers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// [`build_store`] plus a state manager over `tree`.
    pub fn from_config(config: &Config, tree: StateTree) -> Result<Self, AppError> {
        let store = build_store(config)?;
        Ok(Self::new(store, StateManager::new(tree)))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        self.store.adapter()
    }

    pub fn states(&self) -> &StateManager {
        &self.states
    }

    pub fn outlet(&self) -> &Outlet {
        &self.outlet
    }

    /// Controller backing the view named `view`, created on first use.
    pub fn array_controller(&self, view: &str) -> ArrayController {
        self.controllers
            .lock()
            .entry(view.to_string())
            .or_default()
            .clone()
    }

    /// Transition to `path` and load the content its view shows.
    ///
    /// If the user navigates elsewhere before the fetch completes, the
    /// result is dropped instead of being bound to the view. This is
    /// best-effort: the request itself is not cancelled and the fetched
    /// records still land in the store.
    pub async fn load_for_state(&self, path: &str) -> Result<StateLoad, AppError> {
        let transition = self.states.go_to_state(path)?;
        let token = self.states.token();

        let Some((view, model)) = transition
            .view
            .as_ref()
            .and_then(|v| v.content().map(|m| (v.name().to_string(), m.clone())))
        else {
            return Ok(StateLoad {
                transition,
                applied: true,
            });
        };

        let content = self.store.find_all_loaded(model.clone()).await?;
        if !token.is_current() {
            tracing::warn!(
                path = %path,
                model = %model,
                generation = token.generation(),
                "Dropping stale state load"
            );
            return Ok(StateLoad {
                transition,
                applied: false,
            });
        }

        self.array_controller(&view).set_content(Some(content));
        tracing::debug!(path = %path, view = %view, "State content bound");
        Ok(StateLoad {
            transition,
            applied: true,
        })
    }
}
