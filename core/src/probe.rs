//! Echo probe messages
//!
//! A probe message is `#<s>_<s>`: a start marker, a random uppercase
//! string, a centre marker and the same string again. The receiving side
//! splits the notify stream at start markers and checks each message, so
//! corruption and lost chunks show up without any side channel.

use rand::Rng;
use std::fmt;

pub const MSG_START: u8 = b'#';
pub const MSG_CENTER: u8 = b'_';

/// Outcome of checking one received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Valid,
    /// Total length is odd, so the halves cannot match
    OddLength,
    /// No centre marker where one belongs
    MissingCenter,
    /// Halves differ or the start marker is missing
    Corrupt,
}

impl fmt::Display for ProbeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeVerdict::Valid => write!(f, "valid"),
            ProbeVerdict::OddLength => write!(f, "odd length"),
            ProbeVerdict::MissingCenter => write!(f, "missing centre marker"),
            ProbeVerdict::Corrupt => write!(f, "corrupt"),
        }
    }
}

/// Build a probe message whose random half is 1 to `max_len` characters
pub fn random_message<R: Rng + ?Sized>(rng: &mut R, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(1..=max_len.max(1));
    let half: Vec<u8> = (0..len).map(|_| rng.gen_range(b'A'..=b'Z')).collect();

    let mut msg = Vec::with_capacity(2 * len + 2);
    msg.push(MSG_START);
    msg.extend_from_slice(&half);
    msg.push(MSG_CENTER);
    msg.extend_from_slice(&half);
    msg
}

pub fn check_message(msg: &[u8]) -> ProbeVerdict {
    if msg.len() % 2 != 0 {
        return ProbeVerdict::OddLength;
    }
    let center = msg.len() / 2;
    if msg.get(center) != Some(&MSG_CENTER) {
        return ProbeVerdict::MissingCenter;
    }
    if msg[0] != MSG_START || msg[1..center] != msg[center + 1..] {
        return ProbeVerdict::Corrupt;
    }
    ProbeVerdict::Valid
}

/// Reassembles probe messages from a chunked stream.
///
/// A message is complete when the next start marker arrives. After a gap
/// the partial message is dropped and bytes are skipped up to the next
/// start marker.
#[derive(Debug, Default)]
pub struct MessageSplitter {
    pending: Option<Vec<u8>>,
    dropped: u64,
}

impl MessageSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk payload. `in_sequence` is false when chunks were lost
    /// before this one. Returns the messages completed by this chunk.
    pub fn feed(&mut self, payload: &[u8], in_sequence: bool) -> Vec<Vec<u8>> {
        if !in_sequence && self.pending.take().is_some() {
            self.dropped += 1;
        }

        let mut done = Vec::new();
        let mut rest = payload;
        while let Some(pos) = rest.iter().position(|b| *b == MSG_START) {
            if let Some(mut msg) = self.pending.take() {
                msg.extend_from_slice(&rest[..pos]);
                done.push(msg);
            }
            self.pending = Some(vec![MSG_START]);
            rest = &rest[pos + 1..];
        }
        if let Some(msg) = self.pending.as_mut() {
            msg.extend_from_slice(rest);
        }
        done
    }

    /// Take the message still being assembled, if any
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.pending.take()
    }

    /// Partial messages thrown away because of gaps
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
