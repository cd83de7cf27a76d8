//! [`UsbHost`] backed by `nusb`.

use crate::error::LinkError;
use crate::usb::{
    BulkLink, DeviceCandidate, EndpointDirection, EndpointInfo, InterfaceCandidate, TransferType, UsbClass, UsbHost,
};
use nusb::transfer::{EndpointType, RequestBuffer};
use nusb::{Device, DeviceInfo, Interface};
use num_enum::FromPrimitive;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The host's USB stack.
///
/// Access is probed by opening the device. There is no interactive grant on desktop
/// systems, so a permission request only tells the operator what to fix.
#[derive(Debug, Clone, Copy, Default)]
pub struct NusbHost;

impl NusbHost {
    fn find(&self, device: &DeviceCandidate) -> Result<DeviceInfo, LinkError> {
        nusb::list_devices()?
            .find(|d| {
                d.bus_number() == device.bus_number
                    && d.device_address() == device.address
                    && d.vendor_id() == device.vendor_id
                    && d.product_id() == device.product_id
            })
            .ok_or(LinkError::NoDevice)
    }
}

impl UsbHost for NusbHost {
    type Link = NusbLink;

    fn devices(&self) -> Result<Vec<DeviceCandidate>, LinkError> {
        let devices = nusb::list_devices()?
            .map(|info| DeviceCandidate {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                bus_number: info.bus_number(),
                address: info.device_address(),
                product: info.product_string().map(str::to_owned),
                interfaces: info
                    .interfaces()
                    .map(|i| InterfaceCandidate {
                        number: i.interface_number(),
                        class: UsbClass::from_primitive(i.class()),
                    })
                    .collect(),
            })
            .collect();
        Ok(devices)
    }

    fn has_permission(&self, device: &DeviceCandidate) -> bool {
        let Ok(info) = self.find(device) else {
            return false;
        };
        match info.open() {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => false,
            // Other open failures surface again when claiming.
            Err(_) => true,
        }
    }

    fn request_permission(&self, device: &DeviceCandidate) {
        warn!(
            %device,
            "USB access denied. Add a udev rule such as \
             SUBSYSTEM==\"usb\", ATTRS{{idVendor}}==\"{:04x}\", ATTRS{{idProduct}}==\"{:04x}\", MODE=\"0666\" \
             and retry the join",
            device.vendor_id,
            device.product_id
        );
    }

    fn claim(&self, device: &DeviceCandidate, interface: u8) -> Result<NusbLink, LinkError> {
        let info = self.find(device)?;
        let handle = info.open()?;
        let claimed = handle.detach_and_claim_interface(interface)?;
        info!(%device, interface, "Interface claimed successfully.");
        let endpoints = read_endpoints(&handle, interface)?;
        Ok(NusbLink {
            device: Some(handle),
            interface: Some(claimed),
            endpoints,
        })
    }
}

/// Endpoints of alternate setting 0 of `interface` in the active configuration.
fn read_endpoints(device: &Device, interface: u8) -> Result<Vec<EndpointInfo>, LinkError> {
    let config = device
        .active_configuration()
        .map_err(|e| LinkError::Protocol(format!("active configuration: {e:?}")))?;
    let mut endpoints = Vec::new();
    for group in config.interfaces() {
        for setting in group.alt_settings() {
            if setting.interface_number() != interface || setting.alternate_setting() != 0 {
                continue;
            }
            for ep in setting.endpoints() {
                let address = ep.address();
                endpoints.push(EndpointInfo {
                    address,
                    direction: if address & 0x80 != 0 {
                        EndpointDirection::In
                    } else {
                        EndpointDirection::Out
                    },
                    transfer_type: match ep.transfer_type() {
                        EndpointType::Control => TransferType::Control,
                        EndpointType::Isochronous => TransferType::Isochronous,
                        EndpointType::Bulk => TransferType::Bulk,
                        EndpointType::Interrupt => TransferType::Interrupt,
                    },
                });
            }
        }
    }
    Ok(endpoints)
}

/// A claimed interface. Dropping the `nusb` handles releases and closes them.
pub struct NusbLink {
    device: Option<Device>,
    interface: Option<Interface>,
    endpoints: Vec<EndpointInfo>,
}

impl NusbLink {
    fn interface(&self) -> Result<&Interface, LinkError> {
        self.interface.as_ref().ok_or(LinkError::NotOpen)
    }
}

impl BulkLink for NusbLink {
    fn endpoints(&self) -> Vec<EndpointInfo> {
        self.endpoints.clone()
    }

    async fn bulk_out(&mut self, endpoint: u8, data: Vec<u8>, timeout: Duration) -> Result<usize, LinkError> {
        let transfer = self.interface()?.bulk_out(endpoint, data);
        let completion = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| LinkError::Timeout)?;
        Ok(completion.into_result()?.actual_length())
    }

    async fn bulk_in(&mut self, endpoint: u8, max_len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let transfer = self.interface()?.bulk_in(endpoint, RequestBuffer::new(max_len));
        let completion = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| LinkError::Timeout)?;
        Ok(completion.into_result()?)
    }

    fn release_interface(&mut self) -> Result<(), LinkError> {
        if self.interface.take().is_some() {
            debug!("Interface released");
        }
        Ok(())
    }

    fn close(mut self) -> Result<(), LinkError> {
        self.interface.take();
        if self.device.take().is_some() {
            debug!("Device closed");
        }
        Ok(())
    }
}
