//! Scripted USB host and line channel shared by the integration suites.

// Not every suite uses every helper
#![allow(dead_code)]

use lorart_lib::error::LinkError;
use lorart_lib::line::LineChannel;
use lorart_lib::usb::{BulkLink, DeviceCandidate, EndpointInfo, InterfaceCandidate, UsbClass, UsbHost};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const VID: u16 = 0x2886;
pub const PID: u16 = 0x0011;
pub const EP_IN: u8 = 0x81;
pub const EP_OUT: u8 = 0x01;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Byte stream of one fake device: what the host wrote and what it will read next.
#[derive(Clone, Default)]
pub struct Wire {
    inner: Arc<Mutex<WireState>>,
}

#[derive(Default)]
pub struct WireState {
    pub incoming: VecDeque<Vec<u8>>,
    /// Commands written, without the CR/LF terminator.
    pub written: Vec<String>,
    pub raw_written: Vec<Vec<u8>>,
    /// `(command, reply lines)`; each rule fires once, on the first matching write.
    pub replies: Vec<(String, Vec<String>)>,
    pub short_write: bool,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub bulk_in_calls: usize,
}

impl Wire {
    pub fn state(&self) -> MutexGuard<'_, WireState> {
        self.inner.lock().unwrap()
    }

    pub fn push_chunk(&self, chunk: &[u8]) {
        self.state().incoming.push_back(chunk.to_vec());
    }

    pub fn push_line(&self, line: &str) {
        self.push_chunk(format!("{line}\r\n").as_bytes());
    }

    pub fn reply_to(&self, command: &str, lines: &[&str]) {
        self.state()
            .replies
            .push((command.to_string(), lines.iter().map(|l| l.to_string()).collect()));
    }

    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    /// Replies for the full join handshake ending in a join success URC.
    pub fn script_join_success(&self) {
        self.reply_to("AT", &["OK"]);
        self.reply_to("ATE0", &["OK"]);
        self.reply_to("AT+JOIN", &["+JOIN: Start", "+JOIN: Network joined"]);
    }
}

#[derive(Clone)]
pub struct FakeDevice {
    pub candidate: DeviceCandidate,
    pub permitted: bool,
    pub claimable: bool,
    pub endpoints: Vec<EndpointInfo>,
    pub wire: Wire,
}

impl FakeDevice {
    /// Device with an unrelated interface 0 and a CDC data interface 1.
    pub fn cdc(vendor_id: u16, product_id: u16, address: u8) -> Self {
        Self::with_interfaces(
            vendor_id,
            product_id,
            address,
            &[(0, UsbClass::Hid), (1, UsbClass::CdcData)],
        )
    }

    pub fn with_interfaces(vendor_id: u16, product_id: u16, address: u8, interfaces: &[(u8, UsbClass)]) -> Self {
        Self {
            candidate: DeviceCandidate {
                vendor_id,
                product_id,
                bus_number: 1,
                address,
                product: Some("LoRa-E5".into()),
                interfaces: interfaces
                    .iter()
                    .map(|&(number, class)| InterfaceCandidate { number, class })
                    .collect(),
            },
            permitted: true,
            claimable: true,
            endpoints: vec![EndpointInfo::bulk_in(EP_IN), EndpointInfo::bulk_out(EP_OUT)],
            wire: Wire::default(),
        }
    }

    pub fn without_permission(mut self) -> Self {
        self.permitted = false;
        self
    }

    pub fn unclaimable(mut self) -> Self {
        self.claimable = false;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<EndpointInfo>) -> Self {
        self.endpoints = endpoints;
        self
    }
}

#[derive(Default)]
pub struct HostState {
    pub devices: Vec<FakeDevice>,
    pub fail_enumeration: bool,
    pub permission_requests: Vec<DeviceCandidate>,
    /// `(vendor_id, product_id, interface)` of every successful claim.
    pub claims: Vec<(u16, u16, u8)>,
    pub releases: usize,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct FakeHost {
    inner: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
        let host = Self::default();
        host.state().devices = devices;
        host
    }

    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.inner.lock().unwrap()
    }

    fn device(&self, candidate: &DeviceCandidate) -> Option<FakeDevice> {
        self.state()
            .devices
            .iter()
            .find(|d| d.candidate.bus_number == candidate.bus_number && d.candidate.address == candidate.address)
            .cloned()
    }
}

impl UsbHost for FakeHost {
    type Link = FakeLink;

    fn devices(&self) -> Result<Vec<DeviceCandidate>, LinkError> {
        let state = self.state();
        if state.fail_enumeration {
            return Err(LinkError::Protocol("enumeration failed".into()));
        }
        Ok(state.devices.iter().map(|d| d.candidate.clone()).collect())
    }

    fn has_permission(&self, device: &DeviceCandidate) -> bool {
        self.device(device).is_some_and(|d| d.permitted)
    }

    fn request_permission(&self, device: &DeviceCandidate) {
        self.state().permission_requests.push(device.clone());
    }

    fn claim(&self, device: &DeviceCandidate, interface: u8) -> Result<FakeLink, LinkError> {
        let fake = self.device(device).ok_or(LinkError::NoDevice)?;
        if !fake.claimable {
            return Err(LinkError::Protocol("interface busy".into()));
        }
        self.state()
            .claims
            .push((device.vendor_id, device.product_id, interface));
        Ok(FakeLink {
            wire: fake.wire,
            endpoints: fake.endpoints,
            host: self.inner.clone(),
        })
    }
}

pub struct FakeLink {
    wire: Wire,
    endpoints: Vec<EndpointInfo>,
    host: Arc<Mutex<HostState>>,
}

impl BulkLink for FakeLink {
    fn endpoints(&self) -> Vec<EndpointInfo> {
        self.endpoints.clone()
    }

    async fn bulk_out(&mut self, endpoint: u8, data: Vec<u8>, _timeout: Duration) -> Result<usize, LinkError> {
        assert_eq!(endpoint, EP_OUT);
        let mut wire = self.wire.state();
        if wire.fail_writes {
            return Err(LinkError::Protocol("device disconnected".into()));
        }
        let command = String::from_utf8_lossy(&data).trim_end_matches(['\r', '\n']).to_string();
        wire.raw_written.push(data.clone());
        wire.written.push(command.clone());
        if wire.short_write {
            return Ok(data.len() - 1);
        }
        if let Some(index) = wire.replies.iter().position(|(c, _)| *c == command) {
            let (_, lines) = wire.replies.remove(index);
            for line in lines {
                wire.incoming.push_back(format!("{line}\r\n").into_bytes());
            }
        }
        Ok(data.len())
    }

    async fn bulk_in(&mut self, endpoint: u8, _max_len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        assert_eq!(endpoint, EP_IN);
        {
            let mut wire = self.wire.state();
            wire.bulk_in_calls += 1;
            if wire.fail_reads {
                return Err(LinkError::Protocol("device disconnected".into()));
            }
            if let Some(chunk) = wire.incoming.pop_front() {
                return Ok(chunk);
            }
        }
        tokio::time::sleep(timeout).await;
        Err(LinkError::Timeout)
    }

    fn release_interface(&mut self) -> Result<(), LinkError> {
        self.host.lock().unwrap().releases += 1;
        Ok(())
    }

    fn close(self) -> Result<(), LinkError> {
        self.host.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Line channel that replays a fixed script; `None` entries and an exhausted script
/// behave like a read that times out.
#[derive(Default)]
pub struct ScriptedLines {
    reads: VecDeque<Option<String>>,
    pub writes: Vec<String>,
    pub read_calls: usize,
    pub read_timeouts: Vec<Duration>,
    /// The link drops during this read (1-based); it and every later read return nothing.
    pub lost_at_read: Option<usize>,
    lost: bool,
}

impl ScriptedLines {
    pub fn new(reads: &[Option<&str>]) -> Self {
        Self {
            reads: reads.iter().map(|r| r.map(str::to_string)).collect(),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.reads.len()
    }

    pub fn losing_link_at_read(mut self, read: usize) -> Self {
        self.lost_at_read = Some(read);
        self
    }
}

impl LineChannel for ScriptedLines {
    async fn write_line(&mut self, text: &str, _timeout: Duration) -> bool {
        self.writes.push(text.to_string());
        true
    }

    async fn read_line(&mut self, timeout: Duration) -> Option<String> {
        self.read_calls += 1;
        self.read_timeouts.push(timeout);
        if self.lost || self.lost_at_read == Some(self.read_calls) {
            self.lost = true;
            return None;
        }
        match self.reads.pop_front() {
            Some(Some(line)) => Some(line),
            _ => {
                tokio::time::sleep(timeout).await;
                None
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.lost
    }
}
