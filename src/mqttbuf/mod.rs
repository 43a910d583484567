pub mod common;
pub mod config;
pub mod list;
pub mod trace;
pub mod inbound;
pub mod outbound;

use crate::mqttbuf::common::Result;
use crate::mqttbuf::config::BufferConfig;
use crate::mqttbuf::inbound::InboundBuffer;
use crate::mqttbuf::outbound::OutboundBuffer;

/// Owns one socket's inbound read cache and outbound write queue together.
///
/// `InboundBuffer` and `OutboundBuffer` are independently usable and
/// independently testable, but a socket being torn down needs both flushed
/// at once -- `cleanup` here is that single call.
pub struct SocketBuffers {
    pub inbound: InboundBuffer,
    pub outbound: OutboundBuffer,
}

impl SocketBuffers {
    pub fn new(config: &BufferConfig) -> Result<Self> {
        Ok(SocketBuffers {
            inbound: InboundBuffer::new(config)?,
            outbound: OutboundBuffer::new(config),
        })
    }

    /// Flushes both inbound and outbound state for a socket being torn down.
    pub fn cleanup(&mut self, socket: inbound::SocketId) {
        self.inbound.cleanup(socket);
        self.outbound.write_complete(socket);
    }

    /// Discards all outstanding state for every socket, re-seeding both
    /// buffers to their initial configuration.
    pub fn terminate(&mut self, config: &BufferConfig) -> Result<()> {
        self.inbound.terminate()?;
        self.outbound = OutboundBuffer::new(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use test_env_log::test;

    #[test]
    fn test_cleanup_flushes_both_inbound_and_outbound_state() {
        let config = BufferConfig::default();
        let mut buffers = SocketBuffers::new(&config).unwrap();

        buffers.inbound.queue_char(5, 0x30);
        buffers.inbound.interrupted(5, 0).unwrap();
        buffers.outbound.pending_write(5, vec![Bytes::from_static(b"hello")], 5, 0);

        assert!(buffers.inbound.has_queue(5));
        assert!(buffers.outbound.get_write(5).is_some());

        buffers.cleanup(5);

        assert!(!buffers.inbound.has_queue(5));
        assert!(buffers.outbound.get_write(5).is_none());
    }

    #[test]
    fn test_terminate_discards_all_sockets() {
        let config = BufferConfig::default();
        let mut buffers = SocketBuffers::new(&config).unwrap();

        buffers.inbound.queue_char(1, 0x01);
        buffers.inbound.interrupted(1, 0).unwrap();
        buffers.outbound.pending_write(2, vec![Bytes::from_static(b"x")], 1, 0);

        buffers.terminate(&config).unwrap();

        assert!(!buffers.inbound.has_queue(1));
        assert!(buffers.outbound.get_write(2).is_none());
    }
}
