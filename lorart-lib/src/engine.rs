//! The two host-facing operations, `join` and `fetch`, over one transport.

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::fetch::FetchController;
use crate::join::{JoinController, JoinOutcome};
use crate::payload::{Downlink, UplinkFrame};
use crate::transport::Transport;
use crate::usb::{DeviceFilter, UsbHost};
use tracing::{info, warn};

pub struct LoraLink<H: UsbHost> {
    transport: Transport<H>,
    config: LinkConfig,
}

impl<H: UsbHost> LoraLink<H> {
    pub fn new(host: H, config: LinkConfig) -> Self {
        Self {
            transport: Transport::new(host, config.transport.clone()),
            config,
        }
    }

    pub fn transport(&self) -> &Transport<H> {
        &self.transport
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Opens the device matching `filter` and joins the network.
    ///
    /// Without permission, an access request goes out for the first attached device
    /// whose ids match the filter and the call returns at once; the caller retries later.
    pub async fn join(&mut self, filter: DeviceFilter) -> JoinOutcome {
        info!(vendor_id = ?filter.vendor_id, product_id = ?filter.product_id, "join()");
        match self.transport.open(filter) {
            Ok(()) => {}
            Err(LinkError::NoPermission { .. }) => {
                match self.transport.request_permission(filter) {
                    Ok(true) => {}
                    Ok(false) => warn!("No device to request permission for"),
                    Err(e) => warn!("Permission request failed: {}", e),
                }
                return JoinOutcome::NoPermission;
            }
            Err(LinkError::NoDevice) => return JoinOutcome::NoDevice,
            Err(e) => return JoinOutcome::Fault(e.to_string()),
        }

        match JoinController::new(&mut self.transport, &self.config.join) {
            Ok(controller) => controller.run().await,
            Err(e) => JoinOutcome::Fault(e.to_string()),
        }
    }

    /// Sends `{0x01, code, etag}` and waits for the downlink answer.
    ///
    /// Opens an unfiltered link first if none is open. `None` covers every way of not
    /// getting an answer: no device, no permission, or an empty window.
    pub async fn fetch(&mut self, code: u8, etag: Option<u8>) -> Option<Downlink> {
        if !self.transport.is_open() {
            if let Err(e) = self.transport.open(DeviceFilter::ANY) {
                info!("fetch() link not open: {}", e);
                return None;
            }
        }
        FetchController::new(&mut self.transport, &self.config.fetch)
            .run(UplinkFrame::new(code, etag))
            .await
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}
