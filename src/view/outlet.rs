use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::View;
use crate::state::{StateError, StateManager};

/// Displays whichever view the active state names.
#[derive(Clone, Default)]
pub struct Outlet {
    views: Arc<RwLock<HashMap<String, Arc<dyn View>>>>,
}

impl Outlet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `view` available under the descriptor name `name`.
    pub fn connect(&self, name: impl Into<String>, view: Arc<dyn View>) {
        self.views.write().insert(name.into(), view);
    }

    pub fn disconnect(&self, name: &str) -> Option<Arc<dyn View>> {
        self.views.write().remove(name)
    }

    pub fn view(&self, name: &str) -> Option<Arc<dyn View>> {
        self.views.read().get(name).cloned()
    }

    /// Render the current state's view. A state without a view renders
    /// nothing; a view name nobody connected is an error.
    pub fn render(&self, states: &StateManager) -> Result<Vec<String>, StateError> {
        let Some(descriptor) = states.current_view() else {
            return Ok(Vec::new());
        };
        let view = self
            .view(descriptor.name())
            .ok_or_else(|| StateError::MissingView {
                view: descriptor.name().to_string(),
            })?;
        Ok(view.render())
    }
}
