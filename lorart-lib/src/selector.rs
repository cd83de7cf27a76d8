//! Chooses the device and interface the transport opens.

use crate::error::LinkError;
use crate::usb::{BulkLink, DeviceCandidate, DeviceFilter, EndpointDirection, EndpointInfo, UsbHost};
use tracing::{debug, info, warn};

/// Bulk endpoint pair of a claimed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEndpoints {
    pub bulk_in: u8,
    pub bulk_out: u8,
}

impl BulkEndpoints {
    /// Requires exactly one bulk endpoint in each direction.
    pub fn from_endpoints(endpoints: &[EndpointInfo]) -> Option<Self> {
        let pick = |direction: EndpointDirection| {
            let mut bulk = endpoints.iter().filter(|e| e.is_bulk() && e.direction == direction);
            match (bulk.next(), bulk.next()) {
                (Some(ep), None) => Some(ep.address),
                _ => None,
            }
        };
        Some(Self {
            bulk_in: pick(EndpointDirection::In)?,
            bulk_out: pick(EndpointDirection::Out)?,
        })
    }
}

/// A device that was opened with its interface claimed.
#[derive(Debug)]
pub struct Claimed<L> {
    pub device: DeviceCandidate,
    pub interface: u8,
    pub endpoints: BulkEndpoints,
    pub link: L,
}

/// One-shot result of a selection pass.
#[derive(Debug)]
pub enum Selection<L> {
    Ready(Claimed<L>),
    PermissionPending(DeviceCandidate),
    NotFound,
}

/// Scans attached devices in enumeration order and claims the first usable one.
///
/// A device matching the filter whose access has not been granted ends the scan with
/// [`Selection::PermissionPending`] without being opened. Devices that cannot be claimed
/// or lack a bulk IN/OUT pair are skipped.
pub fn select<H: UsbHost>(host: &H, filter: DeviceFilter) -> Result<Selection<H::Link>, LinkError> {
    for device in host.devices()? {
        if !filter.admits(&device) {
            continue;
        }
        let Some(interface) = device.first_cdc_interface().map(|i| i.number) else {
            debug!(%device, "No CDC interface, skipping");
            continue;
        };

        if !host.has_permission(&device) {
            info!(%device, "Matching device found but access is not granted");
            return Ok(Selection::PermissionPending(device));
        }

        let mut link = match host.claim(&device, interface) {
            Ok(link) => link,
            Err(e) => {
                warn!(%device, interface, "Failed to claim interface: {}", e);
                continue;
            }
        };

        let Some(endpoints) = BulkEndpoints::from_endpoints(&link.endpoints()) else {
            warn!(%device, interface, "Interface lacks a bulk IN/OUT endpoint pair");
            if let Err(e) = link.release_interface() {
                debug!("Release after endpoint check failed: {}", e);
            }
            if let Err(e) = link.close() {
                debug!("Close after endpoint check failed: {}", e);
            }
            continue;
        };

        info!(
            %device,
            interface,
            ep_in = endpoints.bulk_in,
            ep_out = endpoints.bulk_out,
            "Interface claimed"
        );
        return Ok(Selection::Ready(Claimed {
            device,
            interface,
            endpoints,
            link,
        }));
    }
    Ok(Selection::NotFound)
}
