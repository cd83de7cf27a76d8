//! Uplink request and downlink wait for a single telemetry value.

use crate::config::FetchConfig;
use crate::line::LineChannel;
use crate::payload::{Downlink, UplinkFrame, extract_receive_payload};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct FetchController<'a, C: LineChannel> {
    channel: &'a mut C,
    config: &'a FetchConfig,
}

impl<'a, C: LineChannel> FetchController<'a, C> {
    pub fn new(channel: &'a mut C, config: &'a FetchConfig) -> Self {
        Self { channel, config }
    }

    /// Sends the frame and waits up to the configured window for a `+RECVB=` line.
    /// `None` means no downlink arrived; the caller should use another path.
    pub async fn run(mut self, frame: UplinkFrame) -> Option<Downlink> {
        let command = frame.command();
        info!(uplink = %frame.to_hex(), "Sending uplink");
        if !self.channel.write_line(&command, self.config.send_timeout()).await {
            warn!(%command, "Uplink write incomplete");
        }

        let payload = self.await_downlink().await?;
        debug!(payload = hex::encode(&payload), "Downlink received");
        Downlink::decode(&payload)
    }

    async fn await_downlink(&mut self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.config.window();
        while Instant::now() < deadline {
            if !self.channel.is_open() {
                warn!("Link lost while waiting for a downlink");
                return None;
            }
            let Some(line) = self.channel.read_line(self.config.read_timeout()).await else {
                continue;
            };
            debug!(%line, "Downlink poll");
            if let Some(payload) = extract_receive_payload(&line) {
                return Some(payload);
            }
        }
        info!("No downlink within window");
        None
    }
}
