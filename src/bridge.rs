use crate::config::BridgeConfig;
use crate::event::{FramedEvent, MAX_EVENT_BYTES};
use crate::queue::{EventConsumer, EventProducer};
use jack::{
    Client, ClientOptions, Control, Frames, MidiIn, MidiOut, NotificationHandler, Port,
    ProcessHandler, ProcessScope, RawMidi,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::SyncSender;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Notifications;

impl NotificationHandler for Notifications {}

/// Sub-cycle offset at which a serial-captured event is delivered into the
/// server's timeline.
///
/// The capture timestamp is corrected forward by one cycle minus the
/// compensation (scheduling jitter between capture and delivery), floored
/// to keep delivered frames non-decreasing even when capture stamps
/// arrived slightly out of order, then clamped into the current cycle.
fn delivery_offset(
    frame: Frames,
    cycle_start: Frames,
    n_frames: Frames,
    compensation: Frames,
    last_delivered: &mut Frames,
) -> Frames {
    let mut corrected = frame.wrapping_add(n_frames).wrapping_sub(compensation);
    if *last_delivered > corrected {
        corrected = *last_delivered;
    } else {
        *last_delivered = corrected;
    }
    if corrected >= cycle_start {
        (corrected - cycle_start).min(n_frames - 1)
    } else {
        0
    }
}

/// Absolute frame of an event the server delivered at a sub-cycle offset.
fn absolute_frame(cycle_start: Frames, offset: Frames) -> Frames {
    cycle_start.wrapping_add(offset)
}

/// Jitter compensation applied to capture timestamps, about a tenth of the
/// cycle. Empirical; tune per cycle size, correctness does not depend on
/// the exact value.
fn compensation_frames(buffer_size: Frames) -> Frames {
    (f64::from(buffer_size) / 10.0 + 0.5) as Frames
}

struct Process {
    port_in: Port<MidiOut>,
    port_out: Port<MidiIn>,
    from_serial: EventConsumer,
    to_serial: EventProducer,
    compensation: Frames,
    cycle_frame: Arc<AtomicU32>,
    writer_frame: Arc<AtomicU32>,
    wake: SyncSender<()>,
}

impl ProcessHandler for Process {
    fn process(&mut self, _: &Client, ps: &ProcessScope) -> Control {
        let cycle_start = ps.last_frame_time();
        let n_frames = ps.n_frames();

        // The reader thread stamps captured bytes with this.
        self.cycle_frame.store(cycle_start, Ordering::Relaxed);

        // Serial -> server: drain everything captured since last cycle.
        let mut writer = self.port_in.writer(ps);
        let mut last_delivered: Frames = 0;
        while let Some(event) = self.from_serial.pop() {
            let offset = delivery_offset(
                event.frame,
                cycle_start,
                n_frames,
                self.compensation,
                &mut last_delivered,
            );
            // A full port buffer drops the event; the callback never waits.
            let _ = writer.write(&RawMidi {
                time: offset,
                bytes: event.data(),
            });
        }

        // Server -> serial: queue this cycle's output port events.
        let mut queued = false;
        for raw in self.port_out.iter(ps) {
            if raw.bytes.len() > MAX_EVENT_BYTES {
                continue;
            }
            let Some(event) = FramedEvent::new(raw.bytes, absolute_frame(cycle_start, raw.time))
            else {
                continue;
            };
            if self.to_serial.push(event) {
                queued = true;
            }
        }
        if queued {
            self.writer_frame.store(cycle_start, Ordering::Relaxed);
            // One wake per cycle, not per event.
            let _ = self.wake.try_send(());
        }

        Control::Continue
    }
}

/// The audio-server side of the bridge: owns the client and both MIDI
/// ports, moves events between the ports and the ring buffers from inside
/// the process callback.
pub struct ServerBridge {
    client: Option<jack::AsyncClient<Notifications, Process>>,
    cycle_frame: Arc<AtomicU32>,
    sample_rate: usize,
}

impl ServerBridge {
    pub fn start(
        config: &BridgeConfig,
        from_serial: EventConsumer,
        to_serial: EventProducer,
        wake: SyncSender<()>,
        writer_frame: Arc<AtomicU32>,
    ) -> Result<Self, String> {
        let (client, _status) = Client::new(&config.client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| {
                format!(
                    "Failed to create JACK client '{}': {e}",
                    config.client_name
                )
            })?;
        let sample_rate = client.sample_rate();
        let buffer_size = client.buffer_size();

        let port_in = client
            .register_port("MIDI_in", MidiOut::default())
            .map_err(|e| format!("Failed to register MIDI input port: {e}"))?;
        let port_out = client
            .register_port("MIDI_out", MidiIn::default())
            .map_err(|e| format!("Failed to register MIDI output port: {e}"))?;

        let cycle_frame = Arc::new(AtomicU32::new(0));
        let process = Process {
            port_in,
            port_out,
            from_serial,
            to_serial,
            compensation: compensation_frames(buffer_size),
            cycle_frame: cycle_frame.clone(),
            writer_frame,
            wake,
        };

        let client = client
            .activate_async(Notifications, process)
            .map_err(|e| format!("Failed to activate JACK client: {e}"))?;
        info!(
            "JACK client '{}' up, {sample_rate} Hz, {buffer_size} frames per cycle",
            config.client_name
        );

        let bridge = Self {
            client: Some(client),
            cycle_frame,
            sample_rate: sample_rate as usize,
        };
        if let Some(peer) = &config.auto_connect {
            bridge.try_connect(peer);
        }
        Ok(bridge)
    }

    /// One convenience connection attempt to a companion port; missing
    /// peers are not an error.
    fn try_connect(&self, peer: &str) {
        let Some(client) = &self.client else {
            return;
        };
        let client = client.as_client();
        if client.port_by_name(peer).is_none() {
            return;
        }
        let ours = format!("{}:MIDI_in", client.name());
        match client.connect_ports_by_name(&ours, peer) {
            Ok(()) => info!("connected {ours} to {peer}"),
            Err(err) => warn!("could not connect {ours} to {peer}: {err}"),
        }
    }

    /// Cycle-start frame time published by the process callback; the
    /// serial reader stamps captured events with it.
    pub fn frame_clock(&self) -> Arc<AtomicU32> {
        self.cycle_frame.clone()
    }

    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// Deactivates the client, stopping the process callback.
    pub fn shutdown(&mut self) {
        if let Some(client) = self.client.take()
            && let Err(err) = client.deactivate()
        {
            warn!("error deactivating JACK client: {err}");
        }
    }
}

impl Drop for ServerBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
