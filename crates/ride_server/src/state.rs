use std::sync::Arc;

use ride_core::sharing::SharingConfig;

use crate::dispatcher::{DispatchHandle, Providers};
use crate::hub::Hub;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchHandle,
    pub hub: Arc<Hub>,
    pub providers: Arc<Providers>,
    /// Fallback scoring thresholds for `/api/ai/predict`.
    pub sharing: SharingConfig,
}
