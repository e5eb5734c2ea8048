//! XEP-0198 Stream Management engine.
//!
//! Tracks the inbound and outbound stanza counters and the unacked outbound
//! FIFO for a client. The engine outlives individual connections so that a
//! dropped stream can be resumed with its counters and queue intact.

pub mod unacked_queue;

use tracing::{debug, warn};

use crate::stanza::{SmAnswer, SmEnable, SmEnabled, SmResume, SmResumed};
use crate::XmppError;
use unacked_queue::{sequence_lte, UnackedQueue};

/// Stream management state of a client across connections.
#[derive(Debug)]
pub struct StreamManagement {
    /// Counting is active on the current stream
    enabled: bool,
    /// Resumption ID, empty when the stream cannot be resumed
    resume_id: String,
    /// Stanzas received on the managed stream
    inbound: u32,
    /// Stanzas sent on the managed stream
    outbound: u32,
    unacked: UnackedQueue,
    max_unacked: usize,
}

impl StreamManagement {
    /// Create a disabled engine whose unacked queue holds `max_unacked` stanzas.
    pub fn new(max_unacked: usize) -> Self {
        Self {
            enabled: false,
            resume_id: String::new(),
            inbound: 0,
            outbound: 0,
            unacked: UnackedQueue::new(max_unacked),
            max_unacked,
        }
    }

    /// Whether the current stream is managed.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Resumption ID, if the last managed stream can be resumed.
    pub fn resume_id(&self) -> Option<&str> {
        (!self.resume_id.is_empty()).then_some(self.resume_id.as_str())
    }

    /// Inbound stanza count.
    pub fn inbound(&self) -> u32 {
        self.inbound
    }

    /// Outbound stanza count.
    pub fn outbound(&self) -> u32 {
        self.outbound
    }

    /// Number of stanzas awaiting acknowledgement.
    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Sequence numbers awaiting acknowledgement, oldest first.
    pub fn unacked_sequences(&self) -> Vec<u32> {
        self.unacked.sequences()
    }

    /// The `<enable/>` request.
    pub fn enable_request(&self, resume: bool) -> SmEnable {
        SmEnable { resume, max: None }
    }

    /// Apply the server's `<enabled/>`: counting starts from zero.
    pub fn on_enabled(&mut self, enabled: &SmEnabled) {
        self.enabled = true;
        self.resume_id = match (&enabled.id, enabled.resume) {
            (Some(id), true) => id.clone(),
            _ => String::new(),
        };
        self.inbound = 0;
        self.outbound = 0;
        self.unacked.clear();
        debug!(resumable = !self.resume_id.is_empty(), "Stream management enabled");
    }

    /// The `<resume/>` request, when the previous stream is resumable.
    pub fn resume_request(&self) -> Option<SmResume> {
        self.resume_id().map(|previd| SmResume {
            h: self.inbound,
            previd: previd.to_string(),
        })
    }

    /// Apply the server's `<resumed/>`.
    ///
    /// Returns the stanzas the server has not handled, in send order. They
    /// stay queued under their original sequence numbers and must be written
    /// before any new stanza.
    pub fn on_resumed(&mut self, resumed: &SmResumed) -> Result<Vec<String>, XmppError> {
        if resumed.previd != self.resume_id {
            return Err(XmppError::negotiation(format!(
                "resumed unexpected stream '{}'",
                resumed.previd
            )));
        }
        self.acknowledge(resumed.h);
        self.enabled = true;
        debug!(h = resumed.h, resend = self.unacked.len(), "Stream resumed");
        Ok(self.unacked.pending_xml())
    }

    /// Forget everything, e.g. after `<failed/>` or a fresh bind.
    pub fn reset(&mut self) {
        self.enabled = false;
        self.resume_id.clear();
        self.inbound = 0;
        self.outbound = 0;
        self.unacked.clear();
    }

    /// The transport went away. Resumable state is kept for the next attempt;
    /// anything else is discarded.
    pub fn suspend(&mut self) {
        self.enabled = false;
        if self.resume_id.is_empty() {
            self.reset();
        }
    }

    /// Record an outbound stanza before it is written.
    ///
    /// Fails with [`XmppError::Backpressure`] when the unacked queue is full;
    /// the stanza must not be sent in that case.
    pub fn track_outbound(&mut self, stanza_xml: String) -> Result<(), XmppError> {
        if !self.enabled {
            return Ok(());
        }
        if !self.unacked.has_capacity() {
            return Err(XmppError::Backpressure(self.max_unacked));
        }
        self.outbound = self.outbound.wrapping_add(1);
        self.unacked.push(self.outbound, stanza_xml);
        Ok(())
    }

    /// Record a received stanza.
    pub fn mark_inbound(&mut self) {
        if self.enabled {
            self.inbound = self.inbound.wrapping_add(1);
        }
    }

    /// Answer to the peer's `<r/>`.
    pub fn answer(&self) -> SmAnswer {
        SmAnswer { h: self.inbound }
    }

    /// Apply `<a h='N'/>`: drop every queued stanza with sequence <= N.
    pub fn acknowledge(&mut self, h: u32) -> usize {
        if !sequence_lte(h, self.outbound) {
            warn!(h, outbound = self.outbound, "Peer acknowledged more stanzas than were sent");
        }
        self.unacked.acknowledge(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(resume: bool) -> StreamManagement {
        let mut sm = StreamManagement::new(8);
        sm.on_enabled(&SmEnabled {
            id: Some("X".into()),
            resume,
            ..Default::default()
        });
        sm
    }

    #[test]
    fn test_disabled_engine_does_not_count() {
        let mut sm = StreamManagement::new(8);
        sm.track_outbound("<message/>".into()).unwrap();
        sm.mark_inbound();
        assert_eq!(sm.outbound(), 0);
        assert_eq!(sm.inbound(), 0);
        assert_eq!(sm.unacked_len(), 0);
        assert!(sm.resume_request().is_none());
    }

    #[test]
    fn test_ack_drops_acknowledged_prefix() {
        let mut sm = enabled(true);
        for i in 0..3 {
            sm.track_outbound(format!("<iq id='{i}'/>")).unwrap();
        }
        assert_eq!(sm.acknowledge(2), 2);
        assert_eq!(sm.unacked_sequences(), vec![3]);
    }

    #[test]
    fn test_answer_reports_inbound() {
        let mut sm = enabled(false);
        sm.mark_inbound();
        sm.mark_inbound();
        assert_eq!(sm.answer().h, 2);
    }

    #[test]
    fn test_backpressure_when_full() {
        let mut sm = StreamManagement::new(2);
        sm.on_enabled(&SmEnabled::default());
        sm.track_outbound("<a/>".into()).unwrap();
        sm.track_outbound("<b/>".into()).unwrap();
        let err = sm.track_outbound("<c/>".into()).unwrap_err();
        assert!(matches!(err, XmppError::Backpressure(2)));
        assert_eq!(sm.outbound(), 2);
    }

    #[test]
    fn test_resume_returns_survivors_in_order() {
        let mut sm = enabled(true);
        for name in ["p", "a", "b", "c"] {
            sm.track_outbound(format!("<{name}/>")).unwrap();
        }
        sm.acknowledge(2);
        sm.mark_inbound();
        sm.suspend();
        assert!(!sm.is_enabled());

        let resume = sm.resume_request().unwrap();
        assert_eq!(resume.h, 1);
        assert_eq!(resume.previd, "X");

        let resend = sm
            .on_resumed(&SmResumed {
                h: 3,
                previd: "X".into(),
            })
            .unwrap();
        assert_eq!(resend, vec!["<c/>".to_string()]);
        assert_eq!(sm.unacked_sequences(), vec![4]);
        assert!(sm.is_enabled());
    }

    #[test]
    fn test_resumed_with_wrong_id_fails() {
        let mut sm = enabled(true);
        sm.suspend();
        assert!(sm
            .on_resumed(&SmResumed {
                h: 0,
                previd: "Y".into(),
            })
            .is_err());
    }

    #[test]
    fn test_suspend_without_resume_id_resets() {
        let mut sm = enabled(false);
        sm.track_outbound("<a/>".into()).unwrap();
        sm.suspend();
        assert_eq!(sm.unacked_len(), 0);
        assert!(sm.resume_request().is_none());
    }
}
