//! MIDI input via midir.
//!
//! midir delivers messages through a callback on its own driver thread;
//! [`MidiSource`] funnels them into a channel and exposes the non-blocking
//! poll interface the MIDI input node wants: enumerate ports, open one by
//! index, drain pending `(bytes, dt_seconds)` pairs each render.
//!
//! Invariant: exactly one of the idle `MidiInput` handle or the live
//! connection is held at any time; closing a connection hands the input
//! handle back.

use std::sync::mpsc::{self, Receiver};

use midir::{Ignore, MidiInput, MidiInputConnection};

use crate::{Error, Result};

const CLIENT_NAME: &str = "telar";

/// A polled MIDI input port.
pub struct MidiSource {
    input: Option<MidiInput>,
    connection: Option<(MidiInputConnection<()>, usize)>,
    rx: Option<Receiver<(Vec<u8>, f64)>>,
}

impl MidiSource {
    /// Connects to the system MIDI subsystem without opening a port.
    pub fn new() -> Result<Self> {
        let mut input = MidiInput::new(CLIENT_NAME)?;
        input.ignore(Ignore::None);
        Ok(Self {
            input: Some(input),
            connection: None,
            rx: None,
        })
    }

    /// Names of the MIDI input ports currently available.
    pub fn port_names(&self) -> Result<Vec<String>> {
        // A fresh handle enumerates ports even while a connection is open.
        let probe = MidiInput::new(CLIENT_NAME)?;
        Ok(probe
            .ports()
            .iter()
            .map(|port| probe.port_name(port).unwrap_or_else(|_| "unknown".into()))
            .collect())
    }

    /// Name of one port by index.
    pub fn port_name(&self, index: usize) -> Result<String> {
        self.port_names()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::MidiPort(format!("no MIDI input port #{index}")))
    }

    /// Index of the currently open port, if any.
    pub fn open_port_index(&self) -> Option<usize> {
        self.connection.as_ref().map(|(_, index)| *index)
    }

    /// Opens the port at `index`, closing any previously open port first.
    pub fn open_port(&mut self, index: usize) -> Result<()> {
        self.close_port();

        let input = match self.input.take() {
            Some(input) => input,
            None => {
                let mut input = MidiInput::new(CLIENT_NAME)?;
                input.ignore(Ignore::None);
                input
            }
        };

        let ports = input.ports();
        let Some(port) = ports.get(index) else {
            self.input = Some(input);
            return Err(Error::MidiPort(format!("no MIDI input port #{index}")));
        };

        let (tx, rx) = mpsc::channel();
        let mut last_stamp: Option<u64> = None;
        match input.connect(
            port,
            "telar-midi-in",
            move |stamp, message, _| {
                // midir stamps in microseconds since an arbitrary origin;
                // the node wants the delta to the previous message.
                let dt = match last_stamp {
                    Some(previous) => stamp.saturating_sub(previous) as f64 / 1_000_000.0,
                    None => 0.0,
                };
                last_stamp = Some(stamp);
                let _ = tx.send((message.to_vec(), dt));
            },
            (),
        ) {
            Ok(connection) => {
                tracing::info!(port = index, "MIDI input port opened");
                self.connection = Some((connection, index));
                self.rx = Some(rx);
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                self.input = Some(error.into_inner());
                Err(Error::MidiPort(message))
            }
        }
    }

    /// Closes the open port, if any. Idempotent.
    pub fn close_port(&mut self) {
        if let Some((connection, index)) = self.connection.take() {
            let (input, ()) = connection.close();
            self.input = Some(input);
            self.rx = None;
            tracing::info!(port = index, "MIDI input port closed");
        }
    }

    /// Drains one pending message, or `None` when the queue is empty.
    ///
    /// Never blocks; `dt` is the time in seconds since the previous message
    /// (0.0 for the first).
    pub fn poll(&self) -> Option<(Vec<u8>, f64)> {
        self.rx.as_ref()?.try_recv().ok()
    }
}

impl Drop for MidiSource {
    fn drop(&mut self) {
        self.close_port();
    }
}
