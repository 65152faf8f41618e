//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the store, the board event bus (which owns presence), the
//! position reconciler, and the activity recorder. All fields are `Arc` or
//! cheap clones so each handler gets its own handle.

use std::sync::Arc;

use crate::config::Config;
use crate::services::activity::ActivityRecorder;
use crate::services::bus::EventBus;
use crate::services::notify::Notifier;
use crate::services::reconciler::Reconciler;
use crate::storage::Store;

// =============================================================================
// APP STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: EventBus,
    pub reconciler: Arc<Reconciler>,
    pub recorder: Arc<ActivityRecorder>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: Config) -> Self {
        let bus = EventBus::new();
        Self {
            reconciler: Arc::new(Reconciler::new(Arc::clone(&store))),
            recorder: Arc::new(ActivityRecorder::new(Arc::clone(&store), bus.clone())),
            store,
            bus,
            notifier,
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
