//! Owner of the single open USB connection and its line-level I/O.

use crate::config::TransportConfig;
use crate::constants::{COMMAND_TERMINATOR, READ_CHUNK_SIZE};
use crate::error::LinkError;
use crate::line::{LineAssembler, LineChannel};
use crate::selector::{Claimed, Selection, select};
use crate::usb::{BulkLink, DeviceCandidate, DeviceFilter, UsbHost};
use bytes::BytesMut;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
pub enum ConnectionState<L> {
    Closed,
    Open(Claimed<L>),
    /// A matching device was found but access has not been granted yet.
    PermissionPending(DeviceCandidate),
}

pub struct Transport<H: UsbHost> {
    host: H,
    config: TransportConfig,
    state: ConnectionState<H::Link>,
    /// Bytes that followed a newline, replayed when `retain_partial_lines` is set.
    carry: BytesMut,
}

impl<H: UsbHost> Transport<H> {
    pub fn new(host: H, config: TransportConfig) -> Self {
        Self {
            host,
            config,
            state: ConnectionState::Closed,
            carry: BytesMut::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn state(&self) -> &ConnectionState<H::Link> {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open(_))
    }

    /// Closes any current connection, then selects and claims a device.
    pub fn open(&mut self, filter: DeviceFilter) -> Result<(), LinkError> {
        self.close();
        match select(&self.host, filter)? {
            Selection::Ready(claimed) => {
                info!(device = %claimed.device, "Link open");
                self.state = ConnectionState::Open(claimed);
                Ok(())
            }
            Selection::PermissionPending(device) => {
                let err = LinkError::NoPermission {
                    vendor_id: device.vendor_id,
                    product_id: device.product_id,
                };
                self.state = ConnectionState::PermissionPending(device);
                Err(err)
            }
            Selection::NotFound => Err(LinkError::NoDevice),
        }
    }

    /// Releases the interface and closes the device. Errors from either step are logged
    /// and dropped; the state always ends up `Closed`.
    pub fn close(&mut self) {
        self.carry.clear();
        let ConnectionState::Open(mut claimed) = std::mem::replace(&mut self.state, ConnectionState::Closed)
        else {
            return;
        };
        if let Err(e) = claimed.link.release_interface() {
            debug!("Ignoring interface release error: {}", e);
        }
        if let Err(e) = claimed.link.close() {
            debug!("Ignoring device close error: {}", e);
        }
        info!(device = %claimed.device, "Link closed");
    }

    /// Lists attached devices.
    pub fn devices(&self) -> Result<Vec<DeviceCandidate>, LinkError> {
        self.host.devices()
    }

    /// Asks the host for access to the first attached device whose ids match the
    /// filter field by field. Returns whether a request was issued.
    pub fn request_permission(&self, filter: DeviceFilter) -> Result<bool, LinkError> {
        match self.host.devices()?.into_iter().find(|d| filter.matches_each(d)) {
            Some(device) => {
                info!(%device, "Requesting USB permission");
                self.host.request_permission(&device);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn read_line_inner(&mut self, timeout: Duration) -> Option<String> {
        let ConnectionState::Open(claimed) = &mut self.state else {
            return None;
        };
        let retain = self.config.retain_partial_lines;
        let slice = self.config.read_slice();
        let deadline = Instant::now() + timeout;
        let mut assembler = LineAssembler::default();

        if retain && !self.carry.is_empty() {
            let pending = self.carry.split();
            if let Some((line, used)) = assembler.feed(&pending) {
                self.carry.extend_from_slice(&pending[used..]);
                trace!(%line, "Line from carried bytes");
                return Some(line);
            }
        }

        let mut fault = None;
        while Instant::now() < deadline {
            match claimed
                .link
                .bulk_in(claimed.endpoints.bulk_in, READ_CHUNK_SIZE, slice)
                .await
            {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    debug!(bytes = hex::encode(&chunk), "USB Read");
                    if let Some((line, used)) = assembler.feed(&chunk) {
                        let rest = &chunk[used..];
                        if retain {
                            self.carry.extend_from_slice(rest);
                        } else if !rest.is_empty() {
                            trace!(dropped = rest.len(), "Discarding bytes after newline");
                        }
                        return Some(line);
                    }
                }
                Err(LinkError::Timeout) => {}
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            }
        }
        let partial = assembler.take_partial();
        if let Some(e) = fault {
            self.drop_faulted_link("read", &e);
        }
        partial
    }

    /// A transfer failed for a reason other than a timeout: the device is gone or
    /// unusable, so the link is closed and the next operation has to reopen it.
    fn drop_faulted_link(&mut self, direction: &str, error: &LinkError) {
        warn!(direction, "Bulk transfer failed, closing link: {}", error);
        self.close();
    }
}

impl<H: UsbHost> LineChannel for Transport<H> {
    async fn write_line(&mut self, text: &str, timeout: Duration) -> bool {
        let ConnectionState::Open(claimed) = &mut self.state else {
            return false;
        };
        let data = format!("{text}{COMMAND_TERMINATOR}").into_bytes();
        let expected = data.len();
        debug!(bytes = hex::encode(&data), "USB Write");
        let result = claimed.link.bulk_out(claimed.endpoints.bulk_out, data, timeout).await;
        match result {
            Ok(written) if written == expected => true,
            Ok(written) => {
                warn!("{}", LinkError::ShortWrite { written, expected });
                false
            }
            Err(LinkError::Timeout) => {
                warn!(command = text, "Bulk write timed out");
                false
            }
            Err(e) => {
                self.drop_faulted_link("write", &e);
                false
            }
        }
    }

    fn is_open(&self) -> bool {
        Transport::is_open(self)
    }

    async fn read_line(&mut self, timeout: Duration) -> Option<String> {
        self.read_line_inner(timeout).await
    }
}

impl<H: UsbHost> Drop for Transport<H> {
    fn drop(&mut self) {
        self.close();
    }
}
