//! Routes decided actions to the collaborator that executes them.

use crate::collaborator::Collaborator;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, warn};
use vigil_core::error::VigilError;
use vigil_core::model::Action;

/// Static action-to-collaborator routing table, built once at startup from
/// each collaborator's declared action set.
///
/// When two collaborators claim the same action the first registration wins
/// and the conflict is logged; registration order is therefore part of the
/// deployment contract.
pub struct ActionRouter {
    routes: HashMap<Action, Arc<dyn Collaborator>>,
}

impl ActionRouter {
    /// Builds the routing table from the registered collaborators, in order.
    #[must_use]
    pub fn new(collaborators: &[Arc<dyn Collaborator>]) -> Self {
        let mut routes: HashMap<Action, Arc<dyn Collaborator>> = HashMap::new();
        for collaborator in collaborators {
            for &action in collaborator.supported_actions() {
                match routes.entry(action) {
                    Entry::Vacant(entry) => {
                        debug!(
                            action = action.as_str(),
                            collaborator = collaborator.name(),
                            "Registered action route"
                        );
                        entry.insert(Arc::clone(collaborator));
                    }
                    Entry::Occupied(existing) => {
                        warn!(
                            action = action.as_str(),
                            kept = existing.get().name(),
                            ignored = collaborator.name(),
                            "Action claimed twice, keeping first registration"
                        );
                    }
                }
            }
        }
        Self { routes }
    }

    /// The collaborator that handles `action`.
    ///
    /// # Errors
    /// Returns [`VigilError::UnknownAction`] when no collaborator claimed the
    /// action; the caller fails that one operation and audits it.
    pub fn route(&self, action: Action) -> Result<Arc<dyn Collaborator>, VigilError> {
        self.routes
            .get(&action)
            .cloned()
            .ok_or_else(|| VigilError::UnknownAction { action: action.as_str().to_string() })
    }

    /// Whether any collaborator handles `action`.
    #[must_use]
    pub fn handles(&self, action: Action) -> bool {
        self.routes.contains_key(&action)
    }
}
