//! Sample-accurate MIDI buffers.
//!
//! A [`MidiBuffer`] spans one block and maps sample offsets in `[0, B)` to the
//! raw MIDI messages that arrived at that instant. Messages at the same offset
//! keep their insertion order.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// A raw MIDI message as received from the device layer.
pub type MidiMessage = Vec<u8>;

/// Upper nibble of a MIDI status byte selects the opcode.
pub const OPCODE_MASK: u8 = 0xF0;
/// Lower nibble of a MIDI status byte selects the channel.
pub const CHANNEL_MASK: u8 = 0x0F;
/// Note-off opcode.
pub const NOTE_OFF: u8 = 0x80;
/// Note-on opcode.
pub const NOTE_ON: u8 = 0x90;

/// Returns true if the message is a note-on.
pub fn is_note_on(message: &[u8]) -> bool {
    message.first().is_some_and(|s| s & OPCODE_MASK == NOTE_ON)
}

/// Returns true if the message is a note-off.
pub fn is_note_off(message: &[u8]) -> bool {
    message.first().is_some_and(|s| s & OPCODE_MASK == NOTE_OFF)
}

/// Key number of a note message, if present.
pub fn note_key(message: &[u8]) -> Option<u8> {
    message.get(1).copied()
}

/// MIDI messages for one block, indexed by sample offset.
///
/// Offsets must lie in `[0, length)`; [`push`](Self::push) rejects anything
/// outside. Iteration is in ascending offset order, insertion order within an
/// offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiBuffer {
    length: usize,
    events: BTreeMap<usize, Vec<MidiMessage>>,
}

impl MidiBuffer {
    /// Creates an empty buffer spanning `length` samples.
    pub fn new(length: usize) -> Self {
        Self {
            length,
            events: BTreeMap::new(),
        }
    }

    /// The block length this buffer spans.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Total number of messages across all offsets.
    pub fn message_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    /// Returns true if no messages are present.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Appends a message at the given sample offset.
    pub fn push(&mut self, offset: usize, message: MidiMessage) -> Result<()> {
        if offset >= self.length {
            return Err(Error::Argument(format!(
                "MIDI message offset {offset} out of bounds for buffer length {}",
                self.length
            )));
        }
        self.events.entry(offset).or_default().push(message);
        Ok(())
    }

    /// Messages at one sample offset, in insertion order.
    pub fn messages_at(&self, offset: usize) -> &[MidiMessage] {
        debug_assert!(offset < self.length, "offset {offset} out of bounds");
        self.events.get(&offset).map_or(&[], Vec::as_slice)
    }

    /// Iterates `(offset, message)` pairs in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &MidiMessage)> {
        self.events
            .iter()
            .flat_map(|(offset, messages)| messages.iter().map(move |m| (*offset, m)))
    }
}
