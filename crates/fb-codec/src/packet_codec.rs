//! tokio-util codecs for remote protocol messages.

use bytes::{Buf, BytesMut};
use fb_protocol::{ProtocolError, Request, ServerPacket};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Default ceiling for a single buffered message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Decode one message from the front of `src`.
///
/// The decode runs over a borrowed view; `src` is only advanced once a whole
/// message was read, so a partial message is left in place for the next
/// read.
fn decode_message<M>(
    src: &mut BytesMut,
    max_message_size: usize,
    decode: impl FnOnce(&mut &[u8]) -> Result<M, ProtocolError>,
) -> Result<Option<M>, CodecError> {
    if src.is_empty() {
        return Ok(None);
    }

    let mut view: &[u8] = &src[..];
    match decode(&mut view) {
        Ok(message) => {
            let consumed = src.len() - view.len();
            src.advance(consumed);
            tracing::trace!(consumed, remaining = src.len(), "decoded message");
            Ok(Some(message))
        }
        Err(ProtocolError::UnexpectedEof) => {
            if src.len() > max_message_size {
                return Err(CodecError::MessageTooLarge {
                    size: src.len(),
                    max: max_message_size,
                });
            }
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Client side codec: writes [`Request`]s and reads [`ServerPacket`]s.
#[derive(Debug, Clone)]
pub struct ClientCodec {
    max_message_size: usize,
}

impl ClientCodec {
    /// Create a codec with the default message size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the maximum size of a buffered message.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ClientCodec {
    type Item = ServerPacket;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src, self.max_message_size, |buf| ServerPacket::decode(buf))
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tracing::trace!(operation = ?item.operation(), "encoding request");
        item.encode(dst);
        Ok(())
    }
}

/// Server side codec: reads [`Request`]s and writes [`ServerPacket`]s.
///
/// Used by in-process test servers.
#[derive(Debug, Clone)]
pub struct ServerCodec {
    max_message_size: usize,
}

impl ServerCodec {
    /// Create a codec with the default message size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src, self.max_message_size, |buf| Request::decode(buf))
    }
}

impl Encoder<ServerPacket> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fb_protocol::GenericResponse;

    fn encoded(packet: &ServerPacket) -> BytesMut {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        buf
    }

    #[test]
    fn test_decode_waits_for_whole_message() {
        let full = encoded(&ServerPacket::Response(
            GenericResponse::ok(5).with_data(&b"abc"[..]),
        ));
        let mut codec = ClientCodec::new();

        let mut src = BytesMut::from(&full[..full.len() - 3]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), full.len() - 3);

        src.extend_from_slice(&full[full.len() - 3..]);
        let packet = codec.decode(&mut src).unwrap().unwrap();
        assert!(matches!(packet, ServerPacket::Response(ref r) if r.handle == 5));
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_messages() {
        let mut src = encoded(&ServerPacket::Dummy);
        src.extend_from_slice(&encoded(&ServerPacket::Reject));
        let mut codec = ClientCodec::new();
        assert_eq!(codec.decode(&mut src).unwrap(), Some(ServerPacket::Dummy));
        assert_eq!(codec.decode(&mut src).unwrap(), Some(ServerPacket::Reject));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn test_partial_message_limit() {
        let full = encoded(&ServerPacket::Response(
            GenericResponse::ok(1).with_data(vec![0u8; 64]),
        ));
        let mut codec = ClientCodec::new().with_max_message_size(16);
        let mut src = BytesMut::from(&full[..32]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(CodecError::MessageTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn test_unknown_operation_is_error() {
        let mut src = BytesMut::from(&[0u8, 0, 0, 99][..]);
        assert!(matches!(
            ClientCodec::new().decode(&mut src),
            Err(CodecError::Protocol(ProtocolError::UnexpectedOperation(99)))
        ));
    }

    #[test]
    fn test_server_codec_reads_client_requests() {
        let mut client = ClientCodec::new();
        let mut server = ServerCodec::new();
        let mut wire = BytesMut::new();
        client
            .encode(Request::Commit { tr_handle: 9 }, &mut wire)
            .unwrap();
        client.encode(Request::Disconnect, &mut wire).unwrap();

        assert_eq!(
            server.decode(&mut wire).unwrap(),
            Some(Request::Commit { tr_handle: 9 })
        );
        assert_eq!(server.decode(&mut wire).unwrap(), Some(Request::Disconnect));
    }
}
