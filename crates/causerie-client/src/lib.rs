//! Conferencing client: session lifecycle, reactive room state, local
//! media publication and file-transfer bookkeeping.

pub mod downstream;
pub mod prefs;
pub mod publications;
pub mod session;
pub mod store;
pub mod transfers;

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use causerie_media::cue::ToneCue;
use causerie_media::DeviceCapture;
use causerie_signal::TransportFactory;

pub use publications::MediaManager;
pub use session::{SessionConfig, SessionController};
pub use store::RoomStore;

/// Initializes logging. Respects `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("causerie_client=debug,causerie_signal=debug,causerie_media=info,warn")
    });

    fmt().with_env_filter(filter).init();
}

/// Wires up a controller with the device capture backend and the audible
/// disconnect cue. Saved preferences are applied to the store first.
pub fn build_session(factory: Arc<dyn TransportFactory>) -> Arc<SessionController> {
    let store = RoomStore::new();
    prefs::load().apply(&store);
    let media = MediaManager::new(store.clone(), Arc::new(DeviceCapture::new()));
    SessionController::new(store, media, factory, Arc::new(ToneCue))
}
