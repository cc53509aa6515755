//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod backup;
pub mod bookkeeping;
pub mod control;
pub mod device;
pub mod event_bus;
pub mod hub;
pub mod scanner;
pub mod storage;

pub use backup::ConfigBackup;
pub use bookkeeping::DeviceBookkeeping;
pub use control::BridgeControl;
pub use device::{DeviceApi, LineReader, LineWriter};
pub use event_bus::EventPublisher;
pub use hub::{HubClient, HubEvent, HubStatus};
pub use scanner::NetworkScanner;
pub use storage::{DeviceRepository, PortRepository};
