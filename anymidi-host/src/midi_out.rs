//! MIDI output over midir.

use anyhow::{Result, anyhow};
use anymidi_core::{CoreError, MidiMessage, MidiSink, ScheduledEvent};
use midir::{MidiOutput, MidiOutputConnection};
use tracing::info;

const CLIENT_NAME: &str = "anymidi";

/// Names of the available MIDI output ports, in port order.
pub fn port_names() -> Result<Vec<String>> {
    let output = MidiOutput::new(CLIENT_NAME).map_err(|e| anyhow!("MIDI init failed: {}", e))?;
    Ok(output
        .ports()
        .iter()
        .map(|p| output.port_name(p).unwrap_or_else(|_| "<unknown>".to_string()))
        .collect())
}

/// A connected output port.
pub struct MidiPortSink {
    connection: MidiOutputConnection,
}

impl MidiPortSink {
    /// Connects to the port selected by `selector`: a port index, or a
    /// substring of the port name. `None` takes the first port.
    pub fn connect(selector: Option<&str>) -> Result<Self> {
        let output = MidiOutput::new(CLIENT_NAME).map_err(|e| anyhow!("MIDI init failed: {}", e))?;
        let ports = output.ports();
        if ports.is_empty() {
            return Err(anyhow!("No MIDI output ports available"));
        }

        let port = match selector {
            None => &ports[0],
            Some(s) => match s.parse::<usize>() {
                Ok(index) => ports
                    .get(index)
                    .ok_or_else(|| anyhow!("MIDI port index {} out of range (0..{})", index, ports.len()))?,
                Err(_) => ports
                    .iter()
                    .find(|p| output.port_name(p).map(|n| n.contains(s)).unwrap_or(false))
                    .ok_or_else(|| anyhow!("No MIDI output port matching '{}'", s))?,
            },
        };

        let name = output
            .port_name(port)
            .unwrap_or_else(|_| "<unknown>".to_string());
        let connection = output
            .connect(port, "anymidi-out")
            .map_err(|e| anyhow!("Failed to connect to MIDI port '{}': {}", name, e))?;
        info!("Sending MIDI to '{}'", name);

        Ok(Self { connection })
    }

    fn send(&mut self, message: MidiMessage) -> anymidi_core::Result<()> {
        self.connection
            .send(&message.to_bytes())
            .map_err(|e| CoreError::Sink(e.to_string()))
    }
}

impl MidiSink for MidiPortSink {
    fn send_block(&mut self, events: &[ScheduledEvent]) -> anymidi_core::Result<()> {
        for event in events {
            self.send(event.message)?;
        }
        Ok(())
    }

    fn send_now(&mut self, message: MidiMessage) -> anymidi_core::Result<()> {
        self.send(message)
    }
}
