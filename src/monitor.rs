//! Terminal tools: port listing, live port monitor, telemetry printer

use anyhow::Result;
use colored::*;
use dialbridge::engine::{TelemetryEvent, TelemetryKind};
use dialbridge::event::ControlValue;
use dialbridge::normalize::midi::format_hex;
use dialbridge::normalize::{MidiMessage, MidiNormalizer, Normalizer};
use dialbridge::sources::midi;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// List all MIDI input ports in a formatted way
pub fn list_ports_formatted() {
    println!("\n{}", "=== Available MIDI Input Ports ===".bold().cyan());

    match midi::list_input_ports() {
        Ok(ports) if ports.is_empty() => println!("  {}", "(none)".dimmed()),
        Ok(ports) => {
            for (i, name) in ports.iter().enumerate() {
                println!("  [{}] {}", i.to_string().yellow(), name.green());
            }
        }
        Err(e) => println!("  {} {}", "Error:".red(), e),
    }
    println!();
}

/// Print every message of a port with its decoded control event
pub async fn run_monitor(pattern: &str) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1024);
    let dropped = Arc::new(AtomicU64::new(0));
    let (_connection, port_name) = midi::connect_raw(pattern, "dialbridge-monitor", tx, dropped.clone())?;
    let normalizer = MidiNormalizer::new("monitor");
    let start = Instant::now();

    println!("{}", "=== MIDI Monitor ===".bold().cyan());
    println!("Port: {}", port_name.green());
    println!("Press Ctrl+C to exit\n");

    loop {
        let data = tokio::select! {
            data = rx.recv() => match data {
                Some(data) => data,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        let elapsed = start.elapsed().as_millis();
        let hex = format_hex(&data);
        let hex = match MidiMessage::parse(&data) {
            Ok(Some(MidiMessage::ControlChange { .. })) => hex.bright_yellow(),
            Ok(Some(MidiMessage::NoteOn { .. })) => hex.bright_green(),
            Ok(Some(MidiMessage::NoteOff { .. })) => hex.bright_red(),
            Ok(Some(MidiMessage::PitchBend { .. })) => hex.bright_cyan(),
            Ok(None) => hex.normal(),
            Err(_) => hex.bright_black(),
        };

        let decoded = match normalizer.decode(&data, tokio::time::Instant::now()) {
            Ok(Some(event)) => {
                let value = match event.value {
                    ControlValue::Continuous(v) => format!("{:.3}", v),
                    ControlValue::Discrete(on) => (if on { "on" } else { "off" }).to_string(),
                };
                format!("{} raw={} value={}", event.identity, event.raw_value, value.bright_white())
            }
            Ok(None) => "ignored".dimmed().to_string(),
            Err(e) => e.reason.red().to_string(),
        };

        println!("[{:>8}ms] {:12} => {}", elapsed.to_string().dimmed(), hex, decoded);
    }

    // Release a callback blocked on a full channel before the port closes
    drop(rx);

    let lost = dropped.load(Ordering::Relaxed);
    if lost > 0 {
        println!("{} {} message(s) dropped", "Warning:".yellow(), lost);
    }

    Ok(())
}

/// Print one telemetry event, as a JSON line or a colored line
pub fn print_telemetry(event: &TelemetryEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to serialize telemetry: {}", e),
        }
        return;
    }

    let kind = match event.kind {
        TelemetryKind::MalformedMessage => event.kind.to_string().yellow(),
        TelemetryKind::UnboundEvent => event.kind.to_string().blue(),
        TelemetryKind::BackendError => event.kind.to_string().red(),
        TelemetryKind::SourceDisconnected => event.kind.to_string().magenta(),
    };
    let identity = event
        .identity
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();

    println!(
        "[{}] {:12} {} {}",
        event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        kind,
        identity.white(),
        event.message
    );
}
