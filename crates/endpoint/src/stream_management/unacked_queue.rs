//! Outbound stanzas awaiting a XEP-0198 acknowledgement.

use std::collections::VecDeque;
use std::time::Instant;

/// A stanza sent but not yet acknowledged by the peer.
#[derive(Debug, Clone)]
pub struct UnackedStanza {
    /// Outbound count when the stanza was sent
    pub sequence: u32,
    /// Serialized stanza, resent verbatim on resumption
    pub stanza_xml: String,
    /// When the stanza was sent
    pub sent_at: Instant,
}

/// FIFO of unacknowledged stanzas with a hard capacity.
#[derive(Debug)]
pub struct UnackedQueue {
    stanzas: VecDeque<UnackedStanza>,
    max_size: usize,
}

impl UnackedQueue {
    /// Create a queue holding at most `max_size` stanzas.
    pub fn new(max_size: usize) -> Self {
        Self {
            stanzas: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Whether another stanza fits.
    pub fn has_capacity(&self) -> bool {
        self.stanzas.len() < self.max_size
    }

    /// Append a stanza. Returns `false` without queuing when the queue is full.
    pub fn push(&mut self, sequence: u32, stanza_xml: String) -> bool {
        if !self.has_capacity() {
            return false;
        }
        self.stanzas.push_back(UnackedStanza {
            sequence,
            stanza_xml,
            sent_at: Instant::now(),
        });
        true
    }

    /// Remove and return the oldest stanza.
    pub fn pop(&mut self) -> Option<UnackedStanza> {
        self.stanzas.pop_front()
    }

    /// Remove up to `n` of the oldest stanzas.
    pub fn pop_n(&mut self, n: usize) -> Vec<UnackedStanza> {
        let n = n.min(self.stanzas.len());
        self.stanzas.drain(..n).collect()
    }

    /// The oldest stanza.
    pub fn peek(&self) -> Option<&UnackedStanza> {
        self.stanzas.front()
    }

    /// Drop every stanza with sequence <= `h`. Returns how many were dropped.
    pub fn acknowledge(&mut self, h: u32) -> usize {
        let mut dropped = 0;
        while let Some(front) = self.stanzas.front() {
            if !sequence_lte(front.sequence, h) {
                break;
            }
            self.stanzas.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Serialized stanzas in send order.
    pub fn pending_xml(&self) -> Vec<String> {
        self.stanzas.iter().map(|s| s.stanza_xml.clone()).collect()
    }

    /// Sequence numbers in send order.
    pub fn sequences(&self) -> Vec<u32> {
        self.stanzas.iter().map(|s| s.sequence).collect()
    }

    pub fn len(&self) -> usize {
        self.stanzas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stanzas.is_empty()
    }

    pub fn clear(&mut self) {
        self.stanzas.clear();
    }
}

/// `a <= b` in 32-bit serial number arithmetic.
///
/// XEP-0198 counters wrap at 2^32, so `b` is ahead of `a` when the forward
/// distance is below 2^31.
pub(crate) fn sequence_lte(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) < 0x8000_0000
}
