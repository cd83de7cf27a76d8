//! Single-consumer worker that serialises every operation on the link.
//!
//! The engine lives on one dedicated thread with its own current-thread runtime, so the
//! transport is never touched concurrently. Requests queue in submission order; each one
//! runs to completion (all its I/O is time-bounded) before the next starts.

use crate::config::LinkConfig;
use crate::engine::LoraLink;
use crate::error::LinkError;
use crate::join::JoinOutcome;
use crate::payload::Downlink;
use crate::usb::{DeviceFilter, UsbHost};
use futures_lite::FutureExt;
use std::panic::AssertUnwindSafe;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

enum Request {
    Join {
        filter: DeviceFilter,
        reply: oneshot::Sender<JoinOutcome>,
    },
    Fetch {
        code: u8,
        etag: Option<u8>,
        reply: oneshot::Sender<Option<Downlink>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the link worker. Cheap to share by reference; dropping it lets the worker
/// finish the queued requests, close the link and exit.
pub struct LoraWorker {
    requests: mpsc::UnboundedSender<Request>,
}

impl LoraWorker {
    pub fn spawn<H>(host: H, config: LinkConfig) -> Result<Self, LinkError>
    where
        H: UsbHost + Send + 'static,
    {
        let (requests, inbox) = mpsc::unbounded_channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| LinkError::Worker(e.to_string()))?;

        thread::Builder::new()
            .name("lorart-link".into())
            .spawn(move || {
                let link = LoraLink::new(host, config);
                runtime.block_on(serve(link, inbox));
            })
            .map_err(|e| LinkError::Worker(e.to_string()))?;

        Ok(Self { requests })
    }

    pub async fn join(&self, filter: DeviceFilter) -> JoinOutcome {
        let (reply, answer) = oneshot::channel();
        if self.requests.send(Request::Join { filter, reply }).is_err() {
            return JoinOutcome::Fault("link worker stopped".into());
        }
        answer
            .await
            .unwrap_or_else(|_| JoinOutcome::Fault("link worker dropped the request".into()))
    }

    pub async fn fetch(&self, code: u8, etag: Option<u8>) -> Option<Downlink> {
        let (reply, answer) = oneshot::channel();
        self.requests.send(Request::Fetch { code, etag, reply }).ok()?;
        answer.await.ok().flatten()
    }

    /// Stops intake after the queued requests and waits until the link is closed.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.requests.send(Request::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
    }
}

async fn serve<H: UsbHost>(mut link: LoraLink<H>, mut inbox: mpsc::UnboundedReceiver<Request>) {
    info!("Link worker started");
    while let Some(request) = inbox.recv().await {
        match request {
            Request::Join { filter, reply } => {
                let result = AssertUnwindSafe(link.join(filter)).catch_unwind().await;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!("join() panicked; closing link");
                        link.close();
                        JoinOutcome::Fault("join panicked".into())
                    }
                };
                if reply.send(outcome).is_err() {
                    debug!("join() caller went away");
                }
            }
            Request::Fetch { code, etag, reply } => {
                let result = AssertUnwindSafe(link.fetch(code, etag)).catch_unwind().await;
                let downlink = match result {
                    Ok(downlink) => downlink,
                    Err(_) => {
                        error!("fetch() panicked; closing link");
                        link.close();
                        None
                    }
                };
                if reply.send(downlink).is_err() {
                    debug!("fetch() caller went away");
                }
            }
            Request::Shutdown { ack } => {
                link.close();
                let _ = ack.send(());
                info!("Link worker stopped");
                return;
            }
        }
    }
    link.close();
    info!("Link worker stopped");
}
