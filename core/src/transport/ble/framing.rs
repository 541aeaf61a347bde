/// Sequence-tagged chunk framing for the GATT notify channel
///
/// An unframed UART buffer is split into chunks no larger than the
/// negotiated payload size. Each chunk carries a one-byte ASCII tag
/// (`'a' + sequence`) followed by raw payload:
///
/// ```text
/// ┌───────────────┬──────────────────────────────┐
/// │ 'a' + seq (1B)│ payload (≤ max_payload - 1)  │
/// └───────────────┴──────────────────────────────┘
/// ```
///
/// The sequence is shared by every transfer on the channel so the receiver
/// can detect dropped notifications across transfer boundaries.

use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Tag byte for sequence 0
pub const BASE_TAG: u8 = b'a';

/// Largest sequence value before wrapping to 0
pub const SEQ_MAX: u8 = 15;

/// Bytes taken by the tag in every chunk
pub const TAG_SIZE: usize = 1;

/// Smallest usable max payload: the tag plus one data byte
pub const MIN_MAX_PAYLOAD: u16 = (TAG_SIZE + 1) as u16;

/// Errors for framing operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Max payload {0} leaves no room for data after the tag")]
    PayloadTooSmall(u16),
    #[error("Empty chunk")]
    EmptyChunk,
    #[error("Invalid tag byte 0x{0:02x}")]
    InvalidTag(u8),
}

/// Cyclic chunk sequence counter in `0..=SEQ_MAX`
#[derive(Debug)]
pub struct SequenceCounter {
    value: AtomicU8,
}

impl SequenceCounter {
    /// Counter starting at 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Counter starting at `initial` (taken modulo `SEQ_MAX + 1`)
    pub fn starting_at(initial: u8) -> Self {
        Self {
            value: AtomicU8::new(initial % (SEQ_MAX + 1)),
        }
    }

    /// Sequence value the next chunk will carry
    pub fn current(&self) -> u8 {
        self.value.load(Ordering::Acquire)
    }

    /// Take the current value and move to the next one, wrapping after
    /// `SEQ_MAX`
    pub fn advance(&self) -> u8 {
        let prev = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(if v >= SEQ_MAX { 0 } else { v + 1 })
            });
        // The closure never returns None
        match prev {
            Ok(v) | Err(v) => v,
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// One framed transmission unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Tag byte, `BASE_TAG + sequence`
    pub tag: u8,
    /// Slice of the original buffer carried by this chunk
    pub payload: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Sequence number encoded in the tag
    pub fn sequence(&self) -> u8 {
        self.tag.wrapping_sub(BASE_TAG)
    }

    /// Size on the wire (tag + payload)
    pub fn wire_len(&self) -> usize {
        TAG_SIZE + self.payload.len()
    }

    /// Append the wire representation to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        out.extend_from_slice(self.payload);
    }

    /// Wire representation as a new vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut out);
        out
    }
}

/// Payload bytes per chunk for a given max payload
pub fn chunk_unit(max_payload: u16) -> Result<usize, FramingError> {
    if max_payload < MIN_MAX_PAYLOAD {
        return Err(FramingError::PayloadTooSmall(max_payload));
    }
    Ok(max_payload as usize - TAG_SIZE)
}

/// Number of chunks `len` bytes frame into
pub fn chunk_count(len: usize, max_payload: u16) -> Result<usize, FramingError> {
    let unit = chunk_unit(max_payload)?;
    Ok((len + unit - 1) / unit)
}

/// Lazy chunk producer over one buffer.
///
/// The sequence counter advances as each chunk is produced, so a caller that
/// stops early leaves the counter exactly after the last chunk it took.
pub struct Framer<'a> {
    remaining: &'a [u8],
    unit: usize,
    sequence: &'a SequenceCounter,
}

impl<'a> Framer<'a> {
    /// Frame `buffer` for a channel whose max payload is `max_payload`
    pub fn new(
        buffer: &'a [u8],
        max_payload: u16,
        sequence: &'a SequenceCounter,
    ) -> Result<Self, FramingError> {
        Ok(Self {
            remaining: buffer,
            unit: chunk_unit(max_payload)?,
            sequence,
        })
    }

    /// Payload bytes per chunk
    pub fn unit(&self) -> usize {
        self.unit
    }

    /// Bytes not yet framed
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl<'a> Iterator for Framer<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.remaining.is_empty() {
            return None;
        }
        let take = self.unit.min(self.remaining.len());
        let (payload, rest) = self.remaining.split_at(take);
        self.remaining = rest;
        Some(Chunk {
            tag: BASE_TAG + self.sequence.advance(),
            payload,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.remaining.len() + self.unit - 1) / self.unit;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Framer<'_> {}

/// A chunk as seen by the receiving peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedChunk<'a> {
    pub sequence: u8,
    pub payload: &'a [u8],
    /// False when the tag did not follow the previous one
    pub in_sequence: bool,
}

/// Counters kept by a `ChunkReceiver`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub total_chunks: u64,
    pub out_of_sequence: u64,
}

/// Peer-side chunk parser that detects gaps in the tag sequence
#[derive(Debug, Default)]
pub struct ChunkReceiver {
    last: Option<u8>,
    stats: ReceiverStats,
}

impl ChunkReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one notification value
    pub fn accept<'a>(&mut self, wire: &'a [u8]) -> Result<ReceivedChunk<'a>, FramingError> {
        let (&tag, payload) = wire.split_first().ok_or(FramingError::EmptyChunk)?;
        if !(BASE_TAG..=BASE_TAG + SEQ_MAX).contains(&tag) {
            return Err(FramingError::InvalidTag(tag));
        }
        let sequence = tag - BASE_TAG;

        let in_sequence = match self.last {
            Some(last) => sequence == if last >= SEQ_MAX { 0 } else { last + 1 },
            None => true,
        };
        self.last = Some(sequence);
        self.stats.total_chunks += 1;
        if !in_sequence {
            self.stats.out_of_sequence += 1;
        }

        Ok(ReceivedChunk {
            sequence,
            payload,
            in_sequence,
        })
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }
}
