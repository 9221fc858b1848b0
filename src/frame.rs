//! Encodes `Command`s into the RESP array-of-bulk-strings wire format used
//! for requests, including the pipelined multi-command variant.
//!
//! ```text
//! *<n>\r\n
//! $<len(a_0)>\r\n<a_0>\r\n
//! $<len(a_1)>\r\n<a_1>\r\n
//! ...
//! ```
//!
//! All integers are ASCII decimal; argument bodies are emitted verbatim
//! (binary-safe). A pipelined batch is simply the concatenation of the
//! per-command encodings, with no batch delimiter.

use crate::command::Command;

fn encode_into(command: &Command, out: &mut Vec<u8>) {
    let parts = command.parts();
    out.push(b'*');
    out.extend_from_slice(parts.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for part in parts {
        out.push(b'$');
        out.extend_from_slice(part.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Encodes a single command into a freshly allocated byte buffer.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(command, &mut out);
    out
}

/// Encodes a batch of commands into one write-ready byte buffer, in order,
/// with no delimiter between commands — the pipelined request format.
pub fn encode_pipeline(commands: &[Command]) -> Vec<u8> {
    let mut out = Vec::new();
    for command in commands {
        encode_into(command, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    #[test]
    fn e6_set_key_val() {
        let cmd = Command::new(
            "SET",
            vec![Buffer::from_str("key"), Buffer::from_str("val")],
        );
        assert_eq!(
            encode_command(&cmd),
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\nval\r\n".to_vec()
        );
    }

    #[test]
    fn pipeline_concatenates_with_no_delimiter() {
        let ping = Command::new("PING", Vec::<Buffer>::new());
        let get = Command::new("GET", vec![Buffer::from_str("key")]);
        let batch = encode_pipeline(&[ping.clone(), get.clone()]);
        let mut expected = encode_command(&ping);
        expected.extend(encode_command(&get));
        assert_eq!(batch, expected);
    }

    #[test]
    fn binary_safe_argument_round_trips_through_frame() {
        let arg = Buffer::from_bytes(vec![0, 1, b'\r', b'\n', 255]);
        let cmd = Command::new("SET", vec![Buffer::from_str("k"), arg.clone()]);
        let bytes = encode_command(&cmd);

        let mut parser = crate::parser::Parser::new();
        let (_, status) = parser.parse(&bytes);
        assert_eq!(status, crate::parser::ParseStatus::Completed);
        let value = parser.take_result().unwrap();
        let items = value.to_array();
        assert_eq!(items[2].to_bytes(), arg.as_bytes());
    }
}
