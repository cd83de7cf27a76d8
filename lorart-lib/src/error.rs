use nusb::transfer::TransferError;
use std::path::PathBuf;
use thiserror::Error;

/// The primary error type for the `lorart-lib` library.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("No USB device with a CDC bulk interface matched the filter")]
    NoDevice,

    #[error("Access to USB device {vendor_id:#06x}:{product_id:#06x} has not been granted")]
    NoPermission { vendor_id: u16, product_id: u16 },

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Timeout during USB transfer")]
    Timeout,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Link is not open")]
    NotOpen,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read configuration {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Link worker is not running: {0}")]
    Worker(String),
}
