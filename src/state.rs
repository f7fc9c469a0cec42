//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It is
//! read-only after startup: the parsed config and the upstream client. The
//! server keeps no per-session state; the session lives in the client's cookie.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::upstream::Upstream;

/// Handler state. Cheap to clone; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self { config: Arc::new(config), upstream }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
