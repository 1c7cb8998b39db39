//! Engine reached as a child process speaking newline-delimited JSON.
//!
//! Outbound frames are written to the child's stdin by a writer task; the
//! child's stdout is decoded line by line into [`InboundMessage`]s. Anything
//! the engine prints on stderr is forwarded to `tracing`.

use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{EngineSettings, Settings};
use crate::engine::{
    EngineGateway, EngineTransport, GatewayConfig, InboundMessage, InboundReceiver,
    OutboundMessage, ProtocolError, TransportError, decode_inbound, encode_outbound,
};
use crate::util::lock::mutex_lock;

use super::error::InfraError;

const SOURCE: &str = "infra::engine_process";
/// Log target for lines the engine writes to stderr.
pub const ENGINE_STDERR_TARGET: &str = "tessera_engine";

pub struct ProcessTransport {
    frames: mpsc::UnboundedSender<String>,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessTransport {
    /// Start the engine described by `settings`. Must be called inside a
    /// tokio runtime.
    pub fn spawn(settings: &EngineSettings) -> Result<(Self, InboundReceiver), InfraError> {
        let mut child = Command::new(&settings.command)
            .args(&settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| InfraError::spawn(&settings.command, err))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| InfraError::spawn(&settings.command, "stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InfraError::spawn(&settings.command, "stdout was not captured"))?;
        let stderr = child.stderr.take();

        info!(
            command = %settings.command,
            pid = child.id(),
            "Render engine process started"
        );

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let mut tasks = vec![
            tokio::spawn(write_frames(stdin, frame_rx)),
            tokio::spawn(read_frames(BufReader::new(stdout), inbound_tx)),
        ];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(forward_stderr(BufReader::new(stderr))));
        }

        let transport = Self {
            frames: frame_tx,
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
            tasks,
        };
        Ok((transport, inbound_rx))
    }
}

impl EngineTransport for ProcessTransport {
    fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let frame =
            encode_outbound(&message).map_err(|err| TransportError::Encode(err.to_string()))?;
        self.frames.send(frame).map_err(|_| TransportError::Closed)
    }

    fn terminate(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut child) = mutex_lock(&self.child, SOURCE, "terminate").take() {
            match child.start_kill() {
                Ok(()) => info!(pid = child.id(), "Render engine process killed"),
                Err(err) => warn!(error = %err, "Failed to kill render engine process"),
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Spawn the configured engine process and wrap it in a gateway.
pub fn connect(settings: &Settings) -> Result<EngineGateway, InfraError> {
    let (transport, inbound) = ProcessTransport::spawn(&settings.engine)?;
    Ok(EngineGateway::new(
        transport,
        inbound,
        GatewayConfig::from(settings),
    ))
}

async fn write_frames<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(err) = write_frame(&mut writer, &frame).await {
            warn!(error = %err, "Engine stdin closed");
            break;
        }
    }
}

async fn write_frame<W>(writer: &mut W, frame: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Decode inbound frames until the stream ends or the gateway goes away.
/// Unknown message types and malformed frames are logged and skipped.
pub(crate) async fn read_frames<R>(reader: R, inbound: mpsc::UnboundedSender<InboundMessage>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Engine output stream ended");
                break;
            }
            Err(err) => {
                warn!(error = %err, "Failed to read engine output");
                break;
            }
        };

        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }

        match decode_inbound(frame) {
            Ok(message) => {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            Err(ProtocolError::UnknownType(kind)) => {
                warn!(message_type = %kind, "Ignoring engine message of unknown type");
            }
            Err(err) => warn!(error = %err, "Discarding malformed engine frame"),
        }
    }
}

async fn forward_stderr<R>(reader: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            info!(target: ENGINE_STDERR_TARGET, "{line}");
        }
    }
}
