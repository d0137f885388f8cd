//! MIDI input ports (midir)

use super::channel::ChannelSource;
use crate::normalize::MidiNormalizer;
use anyhow::{Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Raw messages buffered between the midir callback and the producer task
const MIDI_CHANNEL_CAPACITY: usize = 1024;

/// List available MIDI input ports
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("dialbridge-scanner")?;

    let mut port_names = Vec::new();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// Find an input port by case-insensitive substring match
fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    let pattern = pattern.to_lowercase();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// Note On / Note Off: button edges that must not be lost
fn is_note_message(data: &[u8]) -> bool {
    matches!(data.first().map(|status| status & 0xF0), Some(0x80) | Some(0x90))
}

/// Open an input port and forward its raw bytes to `tx`
///
/// Note messages wait for room in the channel; CC and pitch bend are dropped
/// when it is full and counted in `dropped`. The returned connection must be
/// kept alive for as long as input is wanted.
pub fn connect_raw(
    pattern: &str,
    client_name: &str,
    tx: mpsc::Sender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
) -> Result<(MidiInputConnection<()>, String)> {
    let mut midi_in = MidiInput::new(client_name).context("Failed to create MIDI input")?;
    // Sysex and timing are dropped by the normalizer anyway
    midi_in.ignore(midir::Ignore::All);

    debug!("Found {} MIDI input ports", midi_in.port_count());
    let (port, port_name) = find_input_port(&midi_in, pattern)
        .ok_or_else(|| anyhow::anyhow!("MIDI input port '{}' not found", pattern))?;

    info!("Connecting to MIDI input port: {}", port_name);
    let connection = midi_in
        .connect(
            &port,
            client_name,
            move |_timestamp, data, _| {
                if is_note_message(data) {
                    if tx.blocking_send(data.to_vec()).is_err() {
                        trace!("MIDI source closed, dropping note message");
                    }
                    return;
                }
                match tx.try_send(data.to_vec()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        trace!("MIDI channel full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            },
            (),
        )
        .map_err(|e| anyhow::anyhow!("Failed to connect to input port '{}': {}", port_name, e))?;

    Ok((connection, port_name))
}

/// Open an input port as an event source
pub fn open_input(source_id: &str, pattern: &str) -> Result<ChannelSource<MidiNormalizer>> {
    let (tx, source) = ChannelSource::pair(MidiNormalizer::new(source_id), MIDI_CHANNEL_CAPACITY);
    let (connection, _) = connect_raw(pattern, &format!("dialbridge-{}", source_id), tx, source.drop_counter())?;
    Ok(source.with_guard(connection))
}
