//! Outbound pending-write queue: lets a non-blocking socket's writer hand a
//! multi-segment frame (header, properties, topic, payload -- written
//! separately by the protocol layer to avoid an extra copy into one
//! contiguous buffer) to the kernel as a single scatter/gather write, and
//! resume cleanly if the kernel only accepts part of it.
//!
//! Each segment is a [`bytes::Bytes`]: a refcounted, immutable view of
//! memory the protocol layer already owns. That replaces the parallel
//! ownership-flag array a C-style pending-write struct needs to decide
//! which segments to `free()` when the write finishes -- `Bytes` runs its
//! own destructor when the last handle to a segment is dropped, so there's
//! nothing left to track by hand.
//!
//! As with [`crate::mqttbuf::inbound::InboundBuffer`], this type is not
//! internally synchronized; callers serialize access through the external
//! socket-table mutex.

use bytes::{Buf, Bytes};

use crate::mqttbuf::config::BufferConfig;
use crate::mqttbuf::inbound::SocketId;
use crate::mqttbuf::list::LinkedList;

/// A frame queued for transmission whose initial write did not complete.
pub struct PendingWrite {
    socket: SocketId,
    segments: Vec<Bytes>,
    total: usize,
    sent: usize,
}

impl PendingWrite {
    /// The remaining scatter/gather segments to write, in order. Pass each
    /// as one `IoSlice` to a vectored write call.
    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Total size of the original frame, including bytes already sent.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Bytes of the frame already handed to the kernel.
    pub fn sent(&self) -> usize {
        self.sent
    }

    fn advance(&mut self, mut bytes_written: usize) {
        while bytes_written > 0 {
            let seg = &mut self.segments[0];
            let seg_len = seg.len();
            if bytes_written >= seg_len {
                bytes_written -= seg_len;
                self.segments.remove(0);
            } else {
                seg.advance(bytes_written);
                bytes_written = 0;
            }
        }
    }

    /// True once every segment has been consumed.
    pub fn is_complete(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Per-socket outbound scatter/gather write queue.
pub struct OutboundBuffer {
    writes: LinkedList<PendingWrite>,
    max_scatter_segments: usize,
}

impl OutboundBuffer {
    pub fn new(config: &BufferConfig) -> Self {
        OutboundBuffer {
            writes: LinkedList::new(),
            max_scatter_segments: config.max_scatter_segments,
        }
    }

    /// Records that `bytes_sent` of a `total`-byte frame made up of
    /// `segments` have already been written, queuing the remainder as the
    /// pending write for `socket`.
    ///
    /// # Panics
    /// Panics if `socket` already has a pending write queued -- the caller
    /// must drain one write to completion (`write_complete`) before
    /// starting another -- or if `segments` exceeds the configured scatter
    /// limit.
    pub fn pending_write(&mut self, socket: SocketId, segments: Vec<Bytes>, total: usize, bytes_sent: usize) {
        if segments.len() > self.max_scatter_segments {
            tracing::error!(
                socket,
                segments = segments.len(),
                limit = self.max_scatter_segments,
                "write has more scatter segments than configured limit"
            );
            panic!("pending write exceeds max_scatter_segments");
        }
        if self.writes.find_first(|w| w.socket == socket).is_some() {
            tracing::error!(socket, "pending write already queued for socket");
            panic!("pending write already queued for socket");
        }

        let mut write = PendingWrite { socket, segments, total, sent: 0 };
        if bytes_sent > 0 {
            write.advance(bytes_sent);
        }
        write.sent = bytes_sent;
        if write.is_complete() {
            return;
        }
        self.writes.append(write);
    }

    /// Returns the pending write for `socket`, or `None` if there isn't one.
    pub fn get_write(&self, socket: SocketId) -> Option<&PendingWrite> {
        self.writes.find_first(|w| w.socket == socket)
    }

    /// Records that `bytes_written` additional bytes of the pending write
    /// for `socket` have been handed to the kernel, dropping fully written
    /// segments and trimming the first partially written one. Returns
    /// `true` once every byte of every segment has been written.
    ///
    /// # Panics
    /// Panics if `socket` has no pending write, or if `bytes_written`
    /// exceeds the bytes remaining -- both indicate the caller mismeasured
    /// its own vectored write.
    pub fn advance_write(&mut self, socket: SocketId, bytes_written: usize) -> bool {
        let write = match self.writes.find_first_mut(|w| w.socket == socket) {
            Some(w) => w,
            None => {
                tracing::error!(socket, "advance_write called with no pending write");
                panic!("advance_write called with no pending write");
            }
        };

        let remaining = write.total - write.sent;
        if bytes_written > remaining {
            tracing::error!(
                socket,
                bytes_written,
                remaining,
                "advance_write reported more bytes than were pending"
            );
            panic!("advance_write reported more bytes than were pending");
        }

        write.advance(bytes_written);
        write.sent += bytes_written;
        write.is_complete()
    }

    /// Replaces segments 2 and 3 of a 4-segment pending write with freshly
    /// supplied topic/payload segments, for a QoS-0 publish resubmitted
    /// after its previous attempt was interrupted mid-header. Segments 0
    /// and 1 (the header) are left untouched. Has no effect (but still
    /// returns the existing entry) if the pending write does not have
    /// exactly 4 segments. Returns `None` if there is no pending write for
    /// `socket` at all.
    pub fn update_write(&mut self, socket: SocketId, topic: Bytes, payload: Bytes) -> Option<&PendingWrite> {
        let write = self.writes.find_first_mut(|w| w.socket == socket)?;
        if write.segments.len() == 4 {
            write.segments[2] = topic;
            write.segments[3] = payload;
        }
        Some(write)
    }

    /// Removes the pending write for `socket`, if any exists. Returns `true`
    /// if one was removed. Called once `advance_write` reports completion,
    /// or when the socket is being torn down.
    pub fn write_complete(&mut self, socket: SocketId) -> bool {
        self.writes.remove_item(|w| w.socket == socket, |_| {})
    }
}
