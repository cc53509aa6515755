//! Shared application state for axum handlers.

use std::sync::Arc;

use portbridge_app::ports::BridgeControl;

/// Application state shared across all axum handlers.
///
/// Generic over the bridge implementation to avoid dynamic dispatch.
/// `Clone` is implemented manually so the bridge itself does not need to be
/// `Clone`; only the `Arc` is cloned.
pub struct AppState<C> {
    pub control: Arc<C>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
        }
    }
}

impl<C: BridgeControl> AppState<C> {
    pub fn new(control: C) -> Self {
        Self::from_arc(Arc::new(control))
    }

    /// Use a bridge that is also shared with background tasks.
    pub fn from_arc(control: Arc<C>) -> Self {
        Self { control }
    }
}
