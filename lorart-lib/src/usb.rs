//! USB device model and the host/link seams the engine runs against.
//!
//! [`UsbHost`] stands for the OS side: enumeration, access permission and claiming an
//! interface. [`BulkLink`] is one claimed interface with bulk endpoints. The engine only
//! ever talks to these traits; [`crate::nusb_host`] implements them on real hardware
//! and the test suites implement them with scripted fakes.

use crate::error::LinkError;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Interface class codes relevant to CDC serial links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Serialize)]
#[repr(u8)]
pub enum UsbClass {
    Communications = 0x02,
    Hid = 0x03,
    CdcData = 0x0A,

    #[num_enum(catch_all)]
    Other(u8),
}

impl UsbClass {
    /// Either of the two classes a CDC/ACM serial function exposes.
    pub fn is_cdc(&self) -> bool {
        matches!(self, UsbClass::Communications | UsbClass::CdcData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of a claimed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: EndpointDirection,
    pub transfer_type: TransferType,
}

impl EndpointInfo {
    pub fn bulk_in(address: u8) -> Self {
        Self {
            address,
            direction: EndpointDirection::In,
            transfer_type: TransferType::Bulk,
        }
    }

    pub fn bulk_out(address: u8) -> Self {
        Self {
            address,
            direction: EndpointDirection::Out,
            transfer_type: TransferType::Bulk,
        }
    }

    pub fn is_bulk(&self) -> bool {
        self.transfer_type == TransferType::Bulk
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceCandidate {
    pub number: u8,
    pub class: UsbClass,
}

/// An attached device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCandidate {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
    pub product: Option<String>,
    pub interfaces: Vec<InterfaceCandidate>,
}

impl DeviceCandidate {
    /// The first interface, in index order, whose class is communications or CDC data.
    pub fn first_cdc_interface(&self) -> Option<&InterfaceCandidate> {
        self.interfaces.iter().find(|i| i.class.is_cdc())
    }
}

impl fmt::Display for DeviceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {:03} addr {:03})",
            self.vendor_id, self.product_id, self.bus_number, self.address
        )
    }
}

/// Optional vendor/product filter supplied by the caller of `join`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub const ANY: DeviceFilter = DeviceFilter {
        vendor_id: None,
        product_id: None,
    };

    pub fn new(vendor_id: Option<u16>, product_id: Option<u16>) -> Self {
        Self { vendor_id, product_id }
    }

    /// Selection filter: only applied when both ids are given.
    pub fn admits(&self, device: &DeviceCandidate) -> bool {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => device.vendor_id == vid && device.product_id == pid,
            _ => true,
        }
    }

    /// Field-wise match: each given id must equal the device's.
    pub fn matches_each(&self, device: &DeviceCandidate) -> bool {
        self.vendor_id.is_none_or(|vid| device.vendor_id == vid)
            && self.product_id.is_none_or(|pid| device.product_id == pid)
    }
}

/// A claimed interface with bulk endpoints.
#[allow(async_fn_in_trait)]
pub trait BulkLink {
    /// Endpoints of the claimed interface (alternate setting 0).
    fn endpoints(&self) -> Vec<EndpointInfo>;

    /// One bulk OUT transfer; returns the number of bytes the device accepted.
    async fn bulk_out(&mut self, endpoint: u8, data: Vec<u8>, timeout: Duration) -> Result<usize, LinkError>;

    /// One bulk IN transfer of at most `max_len` bytes. [`LinkError::Timeout`] means
    /// nothing arrived within `timeout`.
    async fn bulk_in(&mut self, endpoint: u8, max_len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    fn release_interface(&mut self) -> Result<(), LinkError>;

    fn close(self) -> Result<(), LinkError>;
}

/// Enumeration, permission and claiming services of the host OS.
pub trait UsbHost {
    type Link: BulkLink;

    fn devices(&self) -> Result<Vec<DeviceCandidate>, LinkError>;

    fn has_permission(&self, device: &DeviceCandidate) -> bool;

    /// Asks for access asynchronously. The result arrives out of band; callers retry later.
    fn request_permission(&self, device: &DeviceCandidate);

    /// Opens the device and exclusively claims `interface`.
    fn claim(&self, device: &DeviceCandidate, interface: u8) -> Result<Self::Link, LinkError>;
}
