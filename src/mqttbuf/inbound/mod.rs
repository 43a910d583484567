//! Inbound read-progress cache: makes an interrupted byte-stream read look,
//! to the protocol parser, like one continuous read.
//!
//! [`InboundBuffer`] keeps one [`SocketQueue`] per socket with outstanding
//! partial read state, plus a reusable *default* queue. The default queue is
//! scratch space used until a read is actually interrupted -- the common
//! case, where a read completes in one syscall, never touches the per-socket
//! list at all. Only when [`InboundBuffer::interrupted`] is called does the
//! default queue get promoted into the list and a fresh one allocated in its
//! place.
//!
//! Per §5 of the owning design, `InboundBuffer` is **not** itself
//! mutex-protected: callers must already hold the transport's external
//! socket-table mutex for the duration of every call here. That's what lets
//! `get_queued_data` hand back a buffer reference the caller can write a raw
//! socket read into and then feed straight back into `interrupted`/`complete`
//! without a second lookup.

use crate::mqttbuf::common::Result;
use crate::mqttbuf::config::BufferConfig;
use crate::mqttbuf::list::LinkedList;

/// Opaque socket identifier. `0` is reserved to mean "unowned" for the
/// default queue and must never be used as a real socket id.
pub type SocketId = u32;

/// Capacity of the captured MQTT fixed header (1-5 bytes, length-prefixed).
pub const FIXED_HEADER_CAPACITY: usize = 5;

/// Seed capacity for a freshly allocated queue's payload buffer.
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 1000;

/// Result of [`InboundBuffer::get_queued_char`].
#[derive(strum::Display, Debug, Clone, Copy, Eq, PartialEq)]
pub enum CharStatus {
    /// A cached header byte was returned.
    Complete(u8),
    /// No cached byte is available; the caller must read one from the kernel.
    Interrupted,
    /// The fixed header index has overflowed its 5-byte capacity.
    SocketError,
}

struct SocketQueue {
    socket: SocketId,
    fixed_header: [u8; FIXED_HEADER_CAPACITY],
    index: usize,
    header_len: usize,
    buf: Vec<u8>,
    data_len: usize,
}

impl SocketQueue {
    fn new(initial_buffer_size: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(initial_buffer_size)?;
        buf.resize(initial_buffer_size, 0);
        Ok(SocketQueue {
            socket: 0,
            fixed_header: [0u8; FIXED_HEADER_CAPACITY],
            index: 0,
            header_len: 0,
            buf,
            data_len: 0,
        })
    }

    /// Grows `buf` to at least `bytes_wanted`, preserving any bytes already
    /// valid in it. When there is prior data, the new buffer is allocated and
    /// populated *before* the old one is dropped: freeing a buffer before
    /// copying out of it is a use-after-free, which this ordering avoids by
    /// construction.
    fn ensure_capacity(&mut self, bytes_wanted: usize) -> Result<()> {
        if bytes_wanted <= self.buf.len() {
            return Ok(());
        }
        if self.data_len > 0 {
            let mut new_buf = Vec::new();
            new_buf.try_reserve_exact(bytes_wanted)?;
            new_buf.resize(bytes_wanted, 0);
            new_buf[..self.data_len].copy_from_slice(&self.buf[..self.data_len]);
            self.buf = new_buf;
        } else {
            let additional = bytes_wanted - self.buf.len();
            self.buf.try_reserve_exact(additional)?;
            self.buf.resize(bytes_wanted, 0);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.socket = 0;
        self.index = 0;
        self.header_len = 0;
        self.data_len = 0;
    }
}

/// Per-socket inbound read-progress cache. See the module docs for the
/// default-queue-promotion design.
pub struct InboundBuffer {
    default_queue: SocketQueue,
    queues: LinkedList<SocketQueue>,
    initial_buffer_size: usize,
}

impl InboundBuffer {
    /// Allocates the default queue with the configured seed capacity and an
    /// empty per-socket queue list.
    pub fn new(config: &BufferConfig) -> Result<Self> {
        Ok(InboundBuffer {
            default_queue: SocketQueue::new(config.initial_buffer_size)?,
            queues: LinkedList::new(),
            initial_buffer_size: config.initial_buffer_size,
        })
    }

    /// Releases every per-socket queue's payload buffer, then the list, then
    /// re-seeds the default queue. Unlike dropping and recreating an
    /// `InboundBuffer`, this can be called on a long-lived instance to
    /// discard all outstanding partial-read state at once (for example, when
    /// the owning transport is being recycled for a new connection).
    pub fn terminate(&mut self) -> Result<()> {
        self.queues = LinkedList::new();
        self.default_queue = SocketQueue::new(self.initial_buffer_size)?;
        Ok(())
    }

    fn queue_for(&self, socket: SocketId) -> &SocketQueue {
        self.queues.find_first(|q| q.socket == socket).unwrap_or(&self.default_queue)
    }

    /// Returns a destination buffer of at least `bytes_wanted` capacity for
    /// the caller's next read, together with the number of bytes already
    /// accumulated from prior interrupted reads. The returned slice is a
    /// stable reference until the next `complete`/`cleanup` call for this
    /// socket: write the kernel's read result into
    /// `buf[already_present..]` and hand the total back to `interrupted` or
    /// `complete`.
    pub fn get_queued_data(&mut self, socket: SocketId, bytes_wanted: usize) -> Result<(&mut [u8], usize)> {
        let queue = match self.queues.find_first_mut(|q| q.socket == socket) {
            Some(q) => q,
            None => &mut self.default_queue,
        };
        queue.ensure_capacity(bytes_wanted)?;
        let data_len = queue.data_len;
        Ok((&mut queue.buf[..], data_len))
    }

    /// Fast path for the fixed-header byte-at-a-time parser: returns a
    /// previously queued header byte without touching the kernel, or signals
    /// that the caller must read one itself.
    pub fn get_queued_char(&mut self, socket: SocketId) -> CharStatus {
        if let Some(queue) = self.queues.find_first_mut(|q| q.socket == socket) {
            if queue.index < queue.header_len {
                let c = queue.fixed_header[queue.index];
                queue.index += 1;
                return CharStatus::Complete(c);
            } else if queue.index > 4 {
                tracing::error!(socket, "header is already at full length");
                return CharStatus::SocketError;
            }
        }
        CharStatus::Interrupted
    }

    /// Appends one fixed-header byte for `socket`. Uses the per-socket queue
    /// if one exists, otherwise claims the default queue on first use.
    ///
    /// # Panics
    /// Panics if called with a socket that doesn't own an already-claimed
    /// default queue, or if the header is already full (`index > 4`): both
    /// indicate upstream corruption rather than a recoverable condition.
    pub fn queue_char(&mut self, socket: SocketId, c: u8) {
        let use_default = self.queues.find_first(|q| q.socket == socket).is_none();
        if use_default {
            if self.default_queue.socket == 0 {
                self.default_queue.socket = socket;
            } else if self.default_queue.socket != socket {
                tracing::error!(socket, owner = self.default_queue.socket, "attempt to reuse socket queue");
                panic!("attempt to reuse socket queue");
            }
        }
        let queue = if use_default {
            &mut self.default_queue
        } else {
            self.queues.find_first_mut(|q| q.socket == socket).unwrap()
        };

        if queue.index > 4 {
            tracing::error!(socket, "socket queue fixed_header field full");
            panic!("socket queue fixed_header field full");
        }
        queue.fixed_header[queue.index] = c;
        queue.index += 1;
        queue.header_len = queue.index;
    }

    /// Called when a kernel read for `socket` returns short. Promotes the
    /// default queue into the per-socket list on first interruption, and
    /// allocates a fresh default queue to replace it.
    pub fn interrupted(&mut self, socket: SocketId, bytes_read_so_far: usize) -> Result<()> {
        if let Some(queue) = self.queues.find_first_mut(|q| q.socket == socket) {
            queue.index = 0;
            queue.data_len = bytes_read_so_far;
            return Ok(());
        }

        self.default_queue.socket = socket;
        let fresh = SocketQueue::new(self.initial_buffer_size)?;
        let promoted = std::mem::replace(&mut self.default_queue, fresh);
        self.queues.append(promoted);

        let queue = self.queues.find_first_mut(|q| q.socket == socket).unwrap();
        queue.index = 0;
        queue.data_len = bytes_read_so_far;
        Ok(())
    }

    /// Called when the packet has been fully read. `len` is the total
    /// payload length the caller's parser just finished assembling (not
    /// necessarily anything `data_len` holds: `data_len` is only a
    /// partial-read watermark set by `interrupted`, and is `0` whenever a
    /// read completed in a single syscall). Returns the stable buffer
    /// holding the full payload, and tears down any per-socket queue state
    /// for this socket.
    pub fn complete(&mut self, socket: SocketId, len: usize) -> &[u8] {
        if let Some(promoted) = self.queues.detach(|q| q.socket == socket) {
            self.default_queue = promoted;
        }
        self.default_queue.reset();
        &self.default_queue.buf[..len]
    }

    /// Flushes inbound state for a socket being torn down: removes any
    /// per-socket queue and resets the default queue if this socket owned it.
    pub fn cleanup(&mut self, socket: SocketId) {
        self.queues.remove_item(|q| q.socket == socket, |_| {});
        if self.default_queue.socket == socket {
            self.default_queue.reset();
        }
    }

    /// Returns true if a per-socket queue currently exists for `socket`, or
    /// the default queue is claimed by it. Exposed for tests and assertions;
    /// not part of the read path.
    pub fn has_queue(&self, socket: SocketId) -> bool {
        socket != 0 && (self.default_queue.socket == socket || self.queue_for(socket).socket == socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_env_log::test;

    fn buffer() -> InboundBuffer {
        InboundBuffer::new(&BufferConfig::default()).unwrap()
    }

    #[test]
    fn test_single_shot_small_read() {
        let mut inbound = buffer();
        inbound.queue_char(7, 0x10);
        inbound.queue_char(7, 0x02);

        let (buf, have) = inbound.get_queued_data(7, 2).unwrap();
        assert_eq!(have, 0);
        buf[0] = 0xAA;
        buf[1] = 0xBB;

        let payload = inbound.complete(7, 2);
        assert_eq!(payload, &[0xAA, 0xBB]);
        assert!(!inbound.has_queue(7));
    }

    #[test]
    fn test_interrupted_mid_payload_preserves_buffer_pointer() {
        let mut inbound = buffer();
        {
            let (buf, have) = inbound.get_queued_data(9, 10).unwrap();
            assert_eq!(have, 0);
            buf[0] = 1;
            buf[1] = 2;
            buf[2] = 3;
        }
        inbound.interrupted(9, 3).unwrap();
        assert!(inbound.has_queue(9));

        let (buf, have) = inbound.get_queued_data(9, 10).unwrap();
        assert_eq!(have, 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_byte_conservation_through_get_queued_char() {
        let mut inbound = buffer();
        inbound.queue_char(4, 0x30);
        inbound.queue_char(4, 0x02);
        // No interruption has happened yet, so there's no per-socket queue:
        // get_queued_char only serves cached bytes after promotion.
        assert_eq!(inbound.get_queued_char(4), CharStatus::Interrupted);

        inbound.interrupted(4, 0).unwrap();
        assert_eq!(inbound.get_queued_char(4), CharStatus::Complete(0x30));
        assert_eq!(inbound.get_queued_char(4), CharStatus::Complete(0x02));
        assert_eq!(inbound.get_queued_char(4), CharStatus::Interrupted);
    }

    #[test]
    #[should_panic(expected = "attempt to reuse socket queue")]
    fn test_concurrent_sockets_sharing_default_is_fatal() {
        let mut inbound = buffer();
        inbound.queue_char(4, 0x30);
        inbound.queue_char(5, 0x31);
    }

    #[test]
    #[should_panic(expected = "fixed_header field full")]
    fn test_queue_char_overflow_is_fatal() {
        let mut inbound = buffer();
        for _ in 0..6 {
            inbound.queue_char(3, 0x00);
        }
    }

    #[test]
    fn test_get_queued_char_reports_socket_error_on_overflow() {
        let mut inbound = buffer();
        for _ in 0..5 {
            inbound.queue_char(3, 0x00);
        }
        inbound.interrupted(3, 0).unwrap();
        for _ in 0..5 {
            inbound.get_queued_char(3);
        }
        // index is now 5, which is > 4
        assert_eq!(inbound.get_queued_char(3), CharStatus::SocketError);
    }

    #[test]
    fn test_capacity_is_monotonic_until_complete() {
        let mut inbound = buffer();
        {
            let (buf, _) = inbound.get_queued_data(1, 5000).unwrap();
            assert!(buf.len() >= 5000);
        }
        inbound.interrupted(1, 5000).unwrap();
        let (buf, have) = inbound.get_queued_data(1, 10).unwrap();
        assert!(buf.len() >= 5000);
        assert_eq!(have, 5000);
    }

    #[test]
    fn test_cleanup_releases_per_socket_queue() {
        let mut inbound = buffer();
        inbound.queue_char(2, 0x01);
        inbound.interrupted(2, 0).unwrap();
        assert!(inbound.has_queue(2));
        inbound.cleanup(2);
        assert!(!inbound.has_queue(2));
    }
}
