//! Serial device link
//!
//! A blocking reader thread decodes frames into `FromRadio` messages and hands
//! them to a tokio dispatcher task, which calls the handler registered for each
//! event kind. Writes go through a shared port handle on the blocking pool.

use super::framing::{encode_frame, Chunk, FrameDecoder};
use super::ports::available_usb_ports;
use super::SerialError;
use crate::config::DeviceSection;
use crate::protocol::mesh::{FromRadio, ToRadio};
use crate::protocol::{DeviceEvent, DeviceEventKind};
use crate::transport::{DeviceEventHandler, DeviceLink};
use async_trait::async_trait;
use prost::Message;
use serialport::SerialPort;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Read timeout; bounds how long the reader thread takes to notice a stop request
const READ_TIMEOUT: Duration = Duration::from_millis(100);

type HandlerMap = HashMap<DeviceEventKind, Arc<dyn DeviceEventHandler>>;
type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;
type LostSender = watch::Sender<Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// `None` disables the heartbeat
    pub heartbeat_interval: Option<Duration>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self::from(&DeviceSection::default())
    }
}

impl From<&DeviceSection> for SerialSettings {
    fn from(section: &DeviceSection) -> Self {
        Self {
            baud_rate: section.baud_rate,
            heartbeat_interval: (section.heartbeat_interval_secs > 0)
                .then(|| Duration::from_secs(section.heartbeat_interval_secs)),
        }
    }
}

struct SerialSession {
    port_name: String,
    writer: SharedPort,
    stop: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl SerialSession {
    /// Stop background work without touching the port
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        self.dispatcher.abort();
    }
}

/// Device link over the Meshtastic serial stream API
pub struct SerialDeviceLink {
    settings: SerialSettings,
    handlers: Mutex<HandlerMap>,
    session: Mutex<Option<SerialSession>>,
    lost: Arc<LostSender>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SerialDeviceLink {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            handlers: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            lost: Arc::new(watch::channel(None).0),
        }
    }

    /// Port of the open session
    pub fn port_name(&self) -> Option<String> {
        lock(&self.session).as_ref().map(|s| s.port_name.clone())
    }

    /// True while a session is open and its reader is still running
    pub fn is_connected(&self) -> bool {
        lock(&self.session).is_some() && self.lost.borrow().is_none()
    }

    /// Kinds with a registered handler
    pub fn registered_kinds(&self) -> Vec<DeviceEventKind> {
        lock(&self.handlers).keys().copied().collect()
    }

    fn open_port(&self, port: &str) -> Result<(Box<dyn SerialPort>, Box<dyn SerialPort>), SerialError> {
        let open_err = |source| SerialError::Open {
            port: port.to_string(),
            source,
        };

        let mut writer = serialport::new(port, self.settings.baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(open_err)?;

        // ESP32 boards wake up on DTR/RTS
        let _ = writer.write_data_terminal_ready(true);
        let _ = writer.write_request_to_send(true);

        let reader = writer.try_clone().map_err(open_err)?;
        Ok((reader, writer))
    }

    /// Random non-zero id for the `want_config_id` handshake
    fn config_request_id() -> u32 {
        (uuid::Uuid::new_v4().as_u128() as u32).max(1)
    }
}

/// Encode, frame and write one envelope
async fn write_envelope(writer: &SharedPort, envelope: &ToRadio) -> Result<(), SerialError> {
    let mut payload = Vec::with_capacity(envelope.encoded_len());
    envelope.encode(&mut payload)?;
    let frame = encode_frame(&payload)?;

    let writer = writer.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut port = lock(&writer);
        port.write_all(&frame)?;
        port.flush()
    })
    .await
    .map_err(|e| std::io::Error::new(ErrorKind::Other, e))??;

    trace!(bytes = payload.len(), "Wrote ToRadio frame");
    Ok(())
}

/// Hand an event to its handler
pub(crate) async fn dispatch(handlers: &HandlerMap, event: DeviceEvent, fail_if_no_handler: bool) {
    let kind = event.kind();
    match handlers.get(&kind) {
        Some(handler) => handler.handle(event).await,
        None if fail_if_no_handler => {
            error!(kind = %kind, "No handler registered for device event");
        }
        None => trace!(kind = %kind, "Ignoring device event without handler"),
    }
}

/// Reader thread body: decode frames until stopped or the port fails
///
/// A read failure is published on `lost`; a requested stop is not.
pub(crate) fn read_loop<R: Read>(
    mut port: R,
    stop: &AtomicBool,
    tx: &mpsc::UnboundedSender<FromRadio>,
    lost: &LostSender,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];

    while !stop.load(Ordering::Relaxed) {
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(e) => {
                if !stop.load(Ordering::Relaxed) {
                    error!("Serial read failed, device link lost: {}", e);
                    lost.send_replace(Some(e.to_string()));
                }
                break;
            }
        };

        for chunk in decoder.push(&buf[..n]) {
            match chunk {
                Chunk::Frame(frame) => match FromRadio::decode(frame.as_slice()) {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(frame = %hex::encode(&frame), "Undecodable FromRadio frame: {}", e),
                },
                Chunk::Console(text) => {
                    let text = String::from_utf8_lossy(&text);
                    let text = text.trim_end();
                    if !text.is_empty() {
                        debug!(target: "device_console", "{}", text);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DeviceLink for SerialDeviceLink {
    type Error = SerialError;

    fn available_ports(&self) -> Vec<String> {
        available_usb_ports()
    }

    fn register_handler(&self, kind: DeviceEventKind, handler: Arc<dyn DeviceEventHandler>) {
        if lock(&self.session).is_some() {
            warn!(kind = %kind, "Handlers are fixed once connected, registration ignored");
            return;
        }
        lock(&self.handlers).insert(kind, handler);
    }

    async fn connect(&self, port: &str, fail_if_no_handler: bool) -> Result<(), SerialError> {
        if let Some(current) = self.port_name() {
            if self.is_connected() {
                return Err(SerialError::AlreadyConnected(current));
            }
            if let Some(mut dead) = lock(&self.session).take() {
                debug!(port = %dead.port_name, "Discarding lost serial session");
                dead.stop();
            }
        }

        let (reader_port, writer_port) = self.open_port(port)?;
        self.lost.send_replace(None);
        let writer: SharedPort = Arc::new(Mutex::new(writer_port));
        let stop = Arc::new(AtomicBool::new(false));
        let handlers = lock(&self.handlers).clone();

        let (tx, mut rx) = mpsc::unbounded_channel::<FromRadio>();
        let reader = {
            let stop = stop.clone();
            let lost = self.lost.clone();
            std::thread::Builder::new()
                .name("serial-reader".to_string())
                .spawn(move || read_loop(reader_port, &stop, &tx, &lost))?
        };

        let dispatcher = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                dispatch(&handlers, DeviceEvent::from(msg), fail_if_no_handler).await;
            }
            debug!("Device dispatcher stopped");
        });

        let config_id = Self::config_request_id();
        if let Err(e) = write_envelope(&writer, &ToRadio::want_config(config_id)).await {
            stop.store(true, Ordering::Relaxed);
            dispatcher.abort();
            return Err(e);
        }
        debug!(config_id, "Requested device configuration");

        let heartbeat = self.settings.heartbeat_interval.map(|period| {
            let writer = writer.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                let mut nonce = 0u32;
                loop {
                    ticker.tick().await;
                    nonce = nonce.wrapping_add(1);
                    if let Err(e) = write_envelope(&writer, &ToRadio::heartbeat(nonce)).await {
                        warn!("Failed to send heartbeat: {}", e);
                    }
                }
            })
        });

        info!(port = %port, baud_rate = self.settings.baud_rate, "Serial device connected");

        *lock(&self.session) = Some(SerialSession {
            port_name: port.to_string(),
            writer,
            stop,
            reader: Some(reader),
            dispatcher,
            heartbeat,
        });
        Ok(())
    }

    async fn send(&self, envelope: ToRadio) -> Result<(), SerialError> {
        let lost = self.lost.borrow().clone();
        if let Some(reason) = lost {
            return Err(SerialError::Lost(reason));
        }

        let writer = lock(&self.session)
            .as_ref()
            .map(|session| session.writer.clone())
            .ok_or(SerialError::NotConnected)?;

        write_envelope(&writer, &envelope).await
    }

    async fn disconnect(&self) -> Result<(), SerialError> {
        let session = lock(&self.session).take();
        let Some(mut session) = session else {
            return Ok(());
        };

        let lost = self.lost.borrow().is_some();
        if !lost {
            if let Err(e) = write_envelope(&session.writer, &ToRadio::disconnect()).await {
                debug!("Disconnect notice not sent: {}", e);
            }
        }

        session.stop();
        if let Some(reader) = session.reader.take() {
            let _ = tokio::task::spawn_blocking(move || reader.join()).await;
        }

        info!(port = %session.port_name, "Serial device disconnected");
        Ok(())
    }

    fn link_lost(&self) -> watch::Receiver<Option<String>> {
        self.lost.subscribe()
    }
}

impl Drop for SerialDeviceLink {
    fn drop(&mut self) {
        let session = match self.session.get_mut() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(session) = session.as_mut() {
            session.stop();
        }
    }
}
