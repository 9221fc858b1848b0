//! A `tokio_util::codec` adapter around [`Parser`], so the engine can drive
//! a connection as a `Framed<Socket, RespCodec>` stream/sink the way the
//! teacher drives `Framed<TcpStream, RespCommandFrame>` in its handler.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::parser::{ParseStatus, Parser};
use crate::value::Value;

/// Decodes a stream of RESP2 replies; encodes pre-framed outgoing bytes
/// verbatim (the framer already produced the full RESP wire format).
#[derive(Default)]
pub struct RespCodec {
    parser: Parser,
}

impl RespCodec {
    pub fn new() -> RespCodec {
        RespCodec::default()
    }
}

impl Decoder for RespCodec {
    type Item = Value;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Value>> {
        let (consumed, status) = self.parser.parse(src);
        match status {
            ParseStatus::Incomplete => {
                src.advance(consumed);
                Ok(None)
            }
            ParseStatus::Completed => {
                src.advance(consumed);
                Ok(self.parser.take_result())
            }
            ParseStatus::Error => {
                let err = self
                    .parser
                    .last_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "RESP protocol error".to_string());
                Err(io::Error::new(io::ErrorKind::InvalidData, err))
            }
        }
    }
}

/// Pre-framed outgoing bytes, produced by [`crate::frame::encode_command`]
/// or [`crate::frame::encode_pipeline`].
pub struct OutgoingBytes(pub Vec<u8>);

impl Encoder<OutgoingBytes> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: OutgoingBytes, dst: &mut BytesMut) -> io::Result<()> {
        dst.put_slice(&item.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::command::Command;
    use crate::frame::encode_command;

    #[test]
    fn decode_reassembles_a_split_frame() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*2\r\n:1\r\n"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"$2\r\nhi\r\n");
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value, Value::array(vec![Value::Int(1), Value::bytes("hi")]));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_surfaces_protocol_errors() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"@nope\r\n"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_writes_pre_framed_bytes_verbatim() {
        let mut codec = RespCodec::new();
        let cmd = Command::new("PING", Vec::<Buffer>::new());
        let mut dst = BytesMut::new();
        codec
            .encode(OutgoingBytes(encode_command(&cmd)), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &b"*1\r\n$4\r\nPING\r\n"[..]);
    }
}
