pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod join;
pub mod line;
pub mod nusb_host;
pub mod payload;
pub mod selector;
pub mod transport;
pub mod usb;
pub mod worker;

// Re-export the main entry points for easy access
pub use config::LinkConfig;
pub use engine::LoraLink;
pub use error::LinkError;
pub use join::{JoinOutcome, JoinReply};
pub use nusb_host::NusbHost;
pub use payload::Downlink;
pub use usb::DeviceFilter;
pub use worker::LoraWorker;
