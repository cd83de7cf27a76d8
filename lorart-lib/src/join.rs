//! Network join: AT initialisation followed by `AT+JOIN` and a bounded poll for the verdict.

use crate::config::JoinConfig;
use crate::constants::{
    CMD_APP_EUI, CMD_APP_KEY, CMD_ATTENTION, CMD_DEV_EUI, CMD_ECHO_OFF, CMD_JOIN, CMD_JOIN_STATUS, CMD_MODE_OTAA,
    RESP_ERROR, RESP_JOINED, RESP_OK, RESP_STATUS_JOINED, RESP_STATUS_NOT_JOINED,
};
use crate::error::LinkError;
use crate::line::LineChannel;
use serde::Serialize;
use std::time::Duration;
use strum_macros::Display;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How a line received while polling for the join result is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSignal {
    Joined,
    Error,
    Other,
}

/// Case-insensitive: `JOINED` anywhere or a bare `OK` succeed, `ERROR` anywhere fails.
pub fn classify_join_line(line: &str) -> JoinSignal {
    let upper = line.trim().to_ascii_uppercase();
    if upper.contains(RESP_JOINED) || upper == RESP_OK {
        JoinSignal::Joined
    } else if upper.contains(RESP_ERROR) {
        JoinSignal::Error
    } else {
        JoinSignal::Other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JoinState {
    Init,
    EchoOff,
    CheckStatus,
    /// Index into the provisioning command list.
    Provision(usize),
    SendJoin,
    AwaitVerdict { remaining: u32 },
    Joined,
    Rejected(String),
    TimedOut,
    LinkLost,
}

/// Result of one `join` call. Never an error: every failure is a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The module answered with an `ERROR` line.
    Rejected(String),
    /// The poll budget ran out without a decisive line.
    TimedOut,
    NoDevice,
    NoPermission,
    Fault(String),
}

impl JoinOutcome {
    pub fn is_joined(&self) -> bool {
        matches!(self, JoinOutcome::Joined)
    }

    pub fn reason(&self) -> Option<JoinReason> {
        match self {
            JoinOutcome::NoDevice => Some(JoinReason::NoDevice),
            JoinOutcome::NoPermission => Some(JoinReason::NoPermission),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinReason {
    #[strum(to_string = "no_permission")]
    NoPermission,
    #[strum(to_string = "no_device")]
    NoDevice,
}

/// Host-facing shape `{joined, reason?, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinReply {
    pub joined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<JoinReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&JoinOutcome> for JoinReply {
    fn from(outcome: &JoinOutcome) -> Self {
        Self {
            joined: outcome.is_joined(),
            reason: outcome.reason(),
            error: match outcome {
                JoinOutcome::Fault(message) => Some(message.clone()),
                _ => None,
            },
        }
    }
}

/// Builds the optional OTAA provisioning commands from the configuration.
pub fn provisioning_commands(config: &JoinConfig) -> Result<Vec<String>, LinkError> {
    let Some(otaa) = &config.otaa else {
        return Ok(Vec::new());
    };
    Ok(vec![
        CMD_MODE_OTAA.to_string(),
        format!("{CMD_DEV_EUI}{}", otaa.dev_eui_hex()?),
        format!("{CMD_APP_EUI}{}", otaa.app_eui_hex()?),
        format!("{CMD_APP_KEY}{}", otaa.app_key_hex()?),
    ])
}

/// Drives the join state machine over an open line channel.
pub struct JoinController<'a, C: LineChannel> {
    channel: &'a mut C,
    config: &'a JoinConfig,
    provisioning: Vec<String>,
}

impl<'a, C: LineChannel> JoinController<'a, C> {
    pub fn new(channel: &'a mut C, config: &'a JoinConfig) -> Result<Self, LinkError> {
        let provisioning = provisioning_commands(config)?;
        Ok(Self {
            channel,
            config,
            provisioning,
        })
    }

    pub async fn run(mut self) -> JoinOutcome {
        let mut state = JoinState::Init;
        loop {
            state = match state {
                JoinState::Joined => {
                    info!("Network joined");
                    return JoinOutcome::Joined;
                }
                JoinState::Rejected(line) => {
                    warn!(%line, "Join rejected by module");
                    return JoinOutcome::Rejected(line);
                }
                JoinState::TimedOut => {
                    warn!(attempts = self.config.poll_attempts, "Join poll budget exhausted");
                    return JoinOutcome::TimedOut;
                }
                JoinState::LinkLost => {
                    warn!("Link lost during join");
                    return JoinOutcome::Fault("link lost during join".into());
                }
                _ if !self.channel.is_open() => JoinState::LinkLost,
                other => self.step(other).await,
            };
        }
    }

    async fn step(&mut self, state: JoinState) -> JoinState {
        match state {
            JoinState::Init => {
                self.exchange(CMD_ATTENTION, self.config.attention_timeout()).await;
                JoinState::EchoOff
            }
            JoinState::EchoOff => {
                self.exchange(CMD_ECHO_OFF, self.config.echo_off_timeout()).await;
                if self.config.check_join_status {
                    JoinState::CheckStatus
                } else {
                    self.before_join()
                }
            }
            JoinState::CheckStatus => {
                if self.query_joined().await {
                    info!("Module already joined, skipping join");
                    JoinState::Joined
                } else {
                    self.before_join()
                }
            }
            JoinState::Provision(index) => {
                let command = self.provisioning[index].clone();
                self.exchange(&command, self.config.command_timeout()).await;
                if index + 1 < self.provisioning.len() {
                    JoinState::Provision(index + 1)
                } else {
                    JoinState::SendJoin
                }
            }
            JoinState::SendJoin => {
                info!("Sending join request");
                if !self.channel.write_line(CMD_JOIN, self.config.command_timeout()).await {
                    warn!(command = CMD_JOIN, "Write incomplete");
                }
                JoinState::AwaitVerdict {
                    remaining: self.config.poll_attempts,
                }
            }
            JoinState::AwaitVerdict { remaining: 0 } => JoinState::TimedOut,
            JoinState::AwaitVerdict { remaining } => {
                let next = JoinState::AwaitVerdict {
                    remaining: remaining - 1,
                };
                let Some(line) = self.channel.read_line(self.config.poll_read_timeout()).await else {
                    return next;
                };
                debug!(%line, remaining, "Join response");
                match classify_join_line(&line) {
                    JoinSignal::Joined => JoinState::Joined,
                    JoinSignal::Error => JoinState::Rejected(line),
                    JoinSignal::Other => next,
                }
            }
            terminal => terminal,
        }
    }

    fn before_join(&self) -> JoinState {
        if self.provisioning.is_empty() {
            JoinState::SendJoin
        } else {
            JoinState::Provision(0)
        }
    }

    /// Sends `AT+NJS=?` and waits for a bare `1` or `0`. No answer counts as not joined.
    async fn query_joined(&mut self) -> bool {
        let timeout = self.config.status_timeout();
        if !self.channel.write_line(CMD_JOIN_STATUS, timeout).await {
            warn!(command = CMD_JOIN_STATUS, "Write incomplete");
        }
        let deadline = Instant::now() + timeout;
        while self.channel.is_open() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(line) = self.channel.read_line(remaining).await else {
                continue;
            };
            match line.trim() {
                RESP_STATUS_JOINED => return true,
                RESP_STATUS_NOT_JOINED => return false,
                other => debug!(line = other, "Ignoring line while checking join status"),
            }
        }
        info!("No join status answer");
        false
    }

    /// Writes a command and reads one line, whose content is not inspected.
    async fn exchange(&mut self, command: &str, timeout: Duration) {
        if !self.channel.write_line(command, timeout).await {
            warn!(command, "Write incomplete");
        }
        let reply = self.channel.read_line(timeout).await;
        debug!(command, reply = reply.as_deref().unwrap_or("<none>"), "Discarding reply");
    }
}
