//! Serial link to the control panel.
//!
//! The panel speaks single CRLF-terminated lines in both directions.  It is
//! slow hardware: it needs a settle delay after the port opens, a pacing gap
//! between consecutive commands, and it asks for the init handshake by
//! sending the literal line `init` whenever its firmware restarts.  The link
//! never escalates an I/O error; it goes Disconnected and every later poll
//! or send doubles as the retry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Timelike;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout};
use tokio_serial::SerialPortBuilderExt;
use tokio_serial::SerialStream;
use tracing::{debug, info, warn};

use deck_proto::config::SerialConfig;
use deck_proto::protocol::{Frame, PanelEvent, PanelState};

/// How long one poll waits for bytes before giving the tick back.
const READ_POLL: Duration = Duration::from_millis(20);

/// Outcome of one read poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPoll {
    /// Nothing usable arrived.
    NoEvent,
    /// The panel asked for the init handshake; every cached display line
    /// must be resent.
    HandshakeRequested,
    /// A dial or alarm record was folded into the panel state.
    EventApplied,
}

/// What the control loop needs from the panel side.
#[async_trait]
pub trait PanelPort {
    /// Poll for one inbound line, reconnecting first if the link is down.
    async fn poll(&mut self) -> LinkPoll;
    /// Send one frame.  False means the line did not go out.
    async fn send(&mut self, frame: &Frame) -> bool;
    /// Last values reported by the panel.
    fn state(&self) -> &PanelState;
}

pub struct PanelLink {
    config: SerialConfig,
    port: Option<SerialStream>,
    rx: Vec<u8>,
    state: PanelState,
    max_index: usize,
    /// Panels without the alarm hardware do not get the AL: handshake frame.
    alarm_panel: bool,
}

impl PanelLink {
    pub fn new(
        config: SerialConfig,
        initial: PanelState,
        max_index: usize,
        alarm_panel: bool,
    ) -> Self {
        Self {
            config,
            port: None,
            rx: Vec::new(),
            state: initial,
            max_index,
            alarm_panel,
        }
    }

    /// Try each configured device in order.  On success the panel gets its
    /// settle delay, then the full init handshake.  Failure leaves the link
    /// down; the next poll retries.
    pub async fn connect(&mut self) -> bool {
        self.port = None;
        self.rx.clear();
        let devices = self.config.devices.clone();
        for device in devices {
            match tokio_serial::new(&device, self.config.baud).open_native_async() {
                Ok(stream) => {
                    info!(device = %device, baud = self.config.baud, "panel: port open");
                    self.port = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!(device = %device, error = %e, "panel: open failed");
                }
            }
        }
        if self.port.is_none() {
            return false;
        }
        sleep(Duration::from_millis(self.config.settle_ms)).await;
        self.send_handshake().await
    }

    /// Two blank lines first, to flush whatever half-line sits in the
    /// panel's input buffer, then clock, alarm where fitted, and the done
    /// frame carrying the current selection and index ceiling.
    async fn send_handshake(&mut self) -> bool {
        let now = chrono::Local::now();
        let mut frames = vec![Frame::Time {
            hours: now.hour() as u8,
            minutes: now.minute() as u8,
        }];
        if self.alarm_panel {
            frames.push(Frame::Alarm(self.state.alarm));
        }
        frames.push(Frame::HandshakeDone {
            index: self.state.encoder_index,
            max_index: self.max_index,
        });

        if !self.raw_write("").await || !self.raw_write("").await {
            return false;
        }
        for frame in &frames {
            if !self.raw_write(&frame.encode()).await {
                return false;
            }
        }
        info!("panel: handshake sent");
        true
    }

    /// Put one line on the wire and hold the pacing gap.  An I/O error takes
    /// the link down; recovery happens at the next send or poll, never here.
    async fn raw_write(&mut self, line: &str) -> bool {
        match self.write_line(line).await {
            Ok(()) => {
                debug!(line = %line, "panel: tx");
                sleep(Duration::from_millis(self.config.write_pace_ms)).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "panel: write failed, link down");
                self.port = None;
                false
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "link down",
                ))
            }
        };
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        port.write_all(&bytes).await?;
        port.flush().await
    }

    /// One short read appended to the buffer, then at most one complete line
    /// taken from it, so a chatty panel cannot starve the tick.
    async fn read_line(&mut self) -> Option<String> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return None,
        };
        let mut buf = [0u8; 256];
        match timeout(READ_POLL, port.read(&mut buf)).await {
            Ok(Ok(0)) => {
                warn!("panel: port closed, link down");
                self.port = None;
                return None;
            }
            Ok(Ok(n)) => self.rx.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => {
                warn!(error = %e, "panel: read failed, link down");
                self.port = None;
                return None;
            }
            Err(_) => {}
        }
        take_line(&mut self.rx)
    }
}

#[async_trait]
impl PanelPort for PanelLink {
    async fn poll(&mut self) -> LinkPoll {
        if self.port.is_none() {
            self.connect().await;
            return LinkPoll::NoEvent;
        }
        let line = match self.read_line().await {
            Some(line) => line,
            None => return LinkPoll::NoEvent,
        };
        debug!(line = %line, "panel: rx");
        if line.is_empty() {
            return LinkPoll::NoEvent;
        }
        if line == "init" {
            info!("panel: init requested");
            sleep(Duration::from_millis(self.config.settle_ms)).await;
            self.send_handshake().await;
            return LinkPoll::HandshakeRequested;
        }
        match PanelEvent::parse(&line) {
            Ok(event) => {
                self.state.apply(event, self.max_index);
                LinkPoll::EventApplied
            }
            Err(e) => {
                debug!(error = %e, "panel: dropped malformed line");
                LinkPoll::NoEvent
            }
        }
    }

    async fn send(&mut self, frame: &Frame) -> bool {
        if self.port.is_none() && !self.connect().await {
            return false;
        }
        if self.raw_write(&frame.encode()).await {
            return true;
        }
        // the frame itself is not retried; callers hold the text in their
        // diff cache and try again next tick
        self.connect().await;
        false
    }

    fn state(&self) -> &PanelState {
        &self.state
    }
}

/// Split one LF-terminated line off the front of the buffer, trimming the CR
/// and surrounding whitespace.  None while no full line has arrived.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buf.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}
