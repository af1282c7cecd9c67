use crate::bridge::ServerBridge;
use crate::config::BridgeConfig;
use crate::queue::{QUEUE_CAPACITY, event_queue};
use crate::reader::SerialReader;
use crate::serial::SerialChannel;
use crate::writer::SerialWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::sync_channel;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// One running bridge: the serial channel, the server-side client, both
/// ring buffers and both device threads, with an explicit lifecycle.
///
/// [`BridgeSession::start`] brings everything up or fails; [`stop`]
/// tears everything down exactly once. Device and server errors at
/// startup are fatal, runtime errors are handled locally by the threads.
///
/// [`stop`]: BridgeSession::stop
pub struct BridgeSession {
    bridge: ServerBridge,
    serial: Arc<SerialChannel>,
    running: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl BridgeSession {
    pub fn start(config: BridgeConfig) -> Result<Self, String> {
        let serial = Arc::new(
            SerialChannel::open(&config.device, config.baud)
                .map_err(|e| format!("Failed to open serial device '{}': {e}", config.device))?,
        );

        let (serial_tx, serial_rx) = event_queue(QUEUE_CAPACITY);
        let (server_tx, server_rx) = event_queue(QUEUE_CAPACITY);
        let (wake_tx, wake_rx) = sync_channel::<()>(1);
        let writer_frame = Arc::new(AtomicU32::new(0));

        let bridge = ServerBridge::start(&config, serial_rx, server_tx, wake_tx, writer_frame.clone())?;

        let running = Arc::new(AtomicBool::new(true));
        let writer = SerialWriter::new(
            serial.clone(),
            server_rx,
            wake_rx,
            writer_frame,
            bridge.sample_rate(),
            running.clone(),
        );
        let reader = SerialReader::new(
            serial.clone(),
            serial_tx,
            bridge.frame_clock(),
            running.clone(),
        );

        let writer = thread::Builder::new()
            .name("serial-writer".to_string())
            .spawn(move || writer.work())
            .map_err(|e| format!("Failed to spawn serial writer thread: {e}"))?;
        let reader = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || reader.work())
            .map_err(|e| format!("Failed to spawn serial reader thread: {e}"))?;

        info!("bridge session started on {}", config.device);
        Ok(Self {
            bridge,
            serial,
            running,
            writer: Some(writer),
            reader: Some(reader),
        })
    }

    /// Stops the process callback, the device threads, and restores the
    /// terminal. Safe on every exit path; the serial channel's own `Drop`
    /// backstops the terminal restore.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.bridge.shutdown();

        // Bounded by the writer's wake timeout.
        if let Some(writer) = self.writer.take()
            && writer.join().is_err()
        {
            warn!("serial writer thread panicked");
        }

        // The reader sits in a blocking read and only observes the flag
        // once that read returns (next byte, or the signal's EINTR). Do
        // not wait for it; restore the terminal now and let the handle go.
        if let Some(reader) = self.reader.take()
            && reader.is_finished()
            && reader.join().is_err()
        {
            warn!("serial reader thread panicked");
        }
        self.serial.restore();
        info!("bridge session stopped");
    }
}
