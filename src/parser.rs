//! A resumable RESP2 decoder.
//!
//! `Parser::parse` consumes whatever chunk of bytes the transport handed it
//! — which may end in the middle of a bulk string, a digit run, or anywhere
//! else — and either reports that a full top-level reply is available or
//! preserves every bit of state needed to resume on the next call. No
//! caller-side buffering beyond what the engine already does is required.
//!
//! State transitions and the nested-array bookkeeping follow
//! `examples/original_source/src/redisclient/RedisParser.cpp` closely, with
//! one deliberate deviation: `*` drives a dedicated `ArraySize` state rather
//! than reusing `BulkSize`, since the two replies use the same "signed
//! decimal then CRLF" grammar but there is no reason to conflate them.

use crate::value::Value;
use std::fmt;

const STRING_REPLY: u8 = b'+';
const ERROR_REPLY: u8 = b'-';
const INTEGER_REPLY: u8 = b':';
const BULK_REPLY: u8 = b'$';
const ARRAY_REPLY: u8 = b'*';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    String,
    StringLF,
    ErrorString,
    ErrorLF,
    Integer,
    IntegerLF,
    BulkSize,
    BulkSizeLF,
    Bulk,
    BulkCR,
    BulkLF,
    ArraySize,
    ArraySizeLF,
}

/// The result of a single `Parser::parse` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// A full top-level value is ready; call `take_result()` to retrieve it.
    Completed,
    /// More bytes are needed; all state has been preserved.
    Incomplete,
    /// The byte stream is not valid RESP. Terminal until `reset()`.
    Error,
}

/// Why a parse failed, and which state the parser was in when it noticed —
/// useful for diagnostic logging at the engine layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserError {
    pub state: &'static str,
    pub message: String,
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error in state {}: {}", self.state, self.message)
    }
}

impl std::error::Error for ParserError {}

fn state_name(state: State) -> &'static str {
    match state {
        State::Start => "Start",
        State::String => "String",
        State::StringLF => "StringLF",
        State::ErrorString => "ErrorString",
        State::ErrorLF => "ErrorLF",
        State::Integer => "Integer",
        State::IntegerLF => "IntegerLF",
        State::BulkSize => "BulkSize",
        State::BulkSizeLF => "BulkSizeLF",
        State::Bulk => "Bulk",
        State::BulkCR => "BulkCR",
        State::BulkLF => "BulkLF",
        State::ArraySize => "ArraySize",
        State::ArraySizeLF => "ArraySizeLF",
    }
}

fn is_printable_ascii(c: u8) -> bool {
    c < 128 && c >= 32 && c != 127
}

/// Converts an ASCII digit run (with optional leading `-`) into an `i64`.
/// Digits are assumed already validated by the state transitions that fed
/// this buffer.
fn digits_to_i64(buf: &[u8]) -> i64 {
    if buf.is_empty() {
        return 0;
    }
    let (sign, digits) = if buf[0] == b'-' { (-1i64, &buf[1..]) } else { (1i64, buf) };
    let mut value: i64 = 0;
    for &b in digits {
        value = value * 10 + (b - b'0') as i64;
    }
    sign * value
}

/// A resumable RESP2 decoder. One instance per connection; never shared.
pub struct Parser {
    state: State,
    scratch: Vec<u8>,
    bulk_remaining: i64,
    result: Option<Value>,
    array_remaining: Vec<i64>,
    array_accum: Vec<Vec<Value>>,
    failed: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            state: State::Start,
            scratch: Vec::with_capacity(64),
            bulk_remaining: 0,
            result: None,
            array_remaining: Vec::new(),
            array_accum: Vec::new(),
            failed: false,
        }
    }

    /// Resets the parser to a fresh state. Required after `ParseStatus::Error`
    /// before it can be used again.
    pub fn reset(&mut self) {
        self.state = State::Start;
        self.scratch.clear();
        self.bulk_remaining = 0;
        self.result = None;
        self.array_remaining.clear();
        self.array_accum.clear();
        self.failed = false;
    }

    /// Takes the decoded top-level value after a `Completed` result, leaving
    /// the parser ready to decode the next reply.
    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    fn fail(&mut self, state: State, message: impl Into<String>) -> ParserError {
        self.failed = true;
        ParserError {
            state: state_name(state),
            message: message.into(),
        }
    }

    /// Feeds `bytes` into the decoder. Returns the number of bytes consumed
    /// and the resulting status. On `Error`, `last_error()` carries the
    /// detail and the parser must be `reset()` before reuse.
    pub fn parse(&mut self, bytes: &[u8]) -> (usize, ParseStatus) {
        if self.failed {
            return (0, ParseStatus::Error);
        }

        let mut pos = 0usize;
        let size = bytes.len();

        while pos < size {
            match self.step(bytes, &mut pos, size) {
                Ok(true) => {
                    // a top-level value just completed (state == Start); fall
                    // through to the nested-array bookkeeping below.
                }
                Ok(false) => continue,
                Err(_) => return (pos, ParseStatus::Error),
            }

            if self.complete_child() {
                return (pos, ParseStatus::Completed);
            }
        }

        (pos, ParseStatus::Incomplete)
    }

    /// Returns the last error recorded, if the parser is in the failed
    /// state. Cleared by `reset()`.
    pub fn last_error(&self) -> Option<ParserError> {
        if self.failed {
            Some(ParserError {
                state: state_name(self.state),
                message: "parser is in the failed state; call reset() before reuse".to_string(),
            })
        } else {
            None
        }
    }

    /// Advances the state machine by one input byte (except in `Bulk`,
    /// which fast-paths a whole run). Returns `Ok(true)` if a top-level
    /// value was just completed (`state == Start`), `Ok(false)` otherwise.
    fn step(&mut self, bytes: &[u8], pos: &mut usize, size: usize) -> Result<bool, ParserError> {
        // The Bulk state consumes a whole run of bytes per call rather than
        // transitioning byte-by-byte — essential for throughput on large
        // values (see spec's "Bulk fast-path").
        if self.state == State::Bulk {
            let available = size - *pos;
            let can_read = available.min(self.bulk_remaining as usize);
            self.scratch
                .extend_from_slice(&bytes[*pos..*pos + can_read]);
            *pos += can_read;
            self.bulk_remaining -= can_read as i64;
            if self.bulk_remaining == 0 {
                self.state = State::BulkCR;
            }
            return Ok(false);
        }

        let c = bytes[*pos];
        *pos += 1;

        match self.state {
            State::Start => {
                self.scratch.clear();
                self.state = match c {
                    STRING_REPLY => State::String,
                    ERROR_REPLY => State::ErrorString,
                    INTEGER_REPLY => State::Integer,
                    BULK_REPLY => State::BulkSize,
                    ARRAY_REPLY => State::ArraySize,
                    other => {
                        return Err(self.fail(State::Start, format!("unknown type byte {:?}", other as char)))
                    }
                };
                Ok(false)
            }
            State::String => self.read_line_char(c, State::String, State::StringLF),
            State::ErrorString => self.read_line_char(c, State::ErrorString, State::ErrorLF),
            State::StringLF => {
                if c == b'\n' {
                    self.result = Some(Value::Bytes(std::mem::take(&mut self.scratch)));
                    self.state = State::Start;
                    Ok(true)
                } else {
                    Err(self.fail(State::StringLF, "expected LF after simple string"))
                }
            }
            State::ErrorLF => {
                if c == b'\n' {
                    self.result = Some(Value::Error(std::mem::take(&mut self.scratch)));
                    self.state = State::Start;
                    Ok(true)
                } else {
                    Err(self.fail(State::ErrorLF, "expected LF after error string"))
                }
            }
            State::Integer => self.read_digit_char(c, State::Integer, State::IntegerLF),
            State::IntegerLF => {
                if c == b'\n' {
                    let value = digits_to_i64(&self.scratch);
                    self.scratch.clear();
                    self.result = Some(Value::Int(value));
                    self.state = State::Start;
                    Ok(true)
                } else {
                    Err(self.fail(State::IntegerLF, "expected LF after integer"))
                }
            }
            State::BulkSize => self.read_digit_char(c, State::BulkSize, State::BulkSizeLF),
            State::BulkSizeLF => {
                if c != b'\n' {
                    return Err(self.fail(State::BulkSizeLF, "expected LF after bulk size"));
                }
                let size = digits_to_i64(&self.scratch);
                self.scratch.clear();
                match size.cmp(&-1) {
                    std::cmp::Ordering::Equal => {
                        self.result = Some(Value::Null);
                        self.state = State::Start;
                        Ok(true)
                    }
                    std::cmp::Ordering::Less => {
                        Err(self.fail(State::BulkSizeLF, format!("negative bulk size {size}")))
                    }
                    std::cmp::Ordering::Greater => {
                        self.bulk_remaining = size;
                        self.scratch.reserve(size as usize);
                        self.state = if size == 0 { State::BulkCR } else { State::Bulk };
                        Ok(false)
                    }
                }
            }
            State::BulkCR => {
                if c == b'\r' {
                    self.state = State::BulkLF;
                    Ok(false)
                } else {
                    Err(self.fail(State::BulkCR, "expected CR after bulk body"))
                }
            }
            State::BulkLF => {
                if c == b'\n' {
                    self.result = Some(Value::Bytes(std::mem::take(&mut self.scratch)));
                    self.state = State::Start;
                    Ok(true)
                } else {
                    Err(self.fail(State::BulkLF, "expected LF after bulk body"))
                }
            }
            State::ArraySize => self.read_digit_char(c, State::ArraySize, State::ArraySizeLF),
            State::ArraySizeLF => {
                if c != b'\n' {
                    return Err(self.fail(State::ArraySizeLF, "expected LF after array size"));
                }
                let size = digits_to_i64(&self.scratch);
                self.scratch.clear();
                match size.cmp(&-1) {
                    std::cmp::Ordering::Equal => {
                        self.result = Some(Value::Null);
                        self.state = State::Start;
                        Ok(true)
                    }
                    std::cmp::Ordering::Less => {
                        Err(self.fail(State::ArraySizeLF, format!("negative array size {size}")))
                    }
                    std::cmp::Ordering::Greater if size == 0 => {
                        self.result = Some(Value::Array(Vec::new()));
                        self.state = State::Start;
                        Ok(true)
                    }
                    std::cmp::Ordering::Greater => {
                        self.array_remaining.push(size);
                        self.array_accum.push(Vec::with_capacity(size as usize));
                        self.state = State::Start;
                        Ok(false)
                    }
                }
            }
            State::Bulk => unreachable!("handled above"),
        }
    }

    fn read_line_char(&mut self, c: u8, same: State, next: State) -> Result<bool, ParserError> {
        if c == b'\r' {
            self.state = next;
            Ok(false)
        } else if is_printable_ascii(c) {
            self.scratch.push(c);
            Ok(false)
        } else {
            Err(self.fail(same, format!("non-printable byte {:?} in simple string/error", c)))
        }
    }

    fn read_digit_char(&mut self, c: u8, same: State, next: State) -> Result<bool, ParserError> {
        if c == b'\r' {
            if self.scratch.is_empty() {
                return Err(self.fail(same, "empty digit run before CR"));
            }
            self.state = next;
            Ok(false)
        } else if c.is_ascii_digit() || c == b'-' {
            self.scratch.push(c);
            Ok(false)
        } else {
            Err(self.fail(same, format!("non-digit byte {:?} in size/integer", c)))
        }
    }

    /// Whenever a top-level value just completed, fold it into the
    /// enclosing array (if any) and keep popping completed arrays up the
    /// stack. Returns true once the outermost reply is fully decoded.
    fn complete_child(&mut self) -> bool {
        if self.state != State::Start {
            return false;
        }

        if !self.array_remaining.is_empty() {
            let value = self.result.take().expect("a value must exist once a child completed");
            self.array_accum.last_mut().unwrap().push(value);
            *self.array_remaining.last_mut().unwrap() -= 1;

            while !self.array_remaining.is_empty() && *self.array_remaining.last().unwrap() == 0 {
                self.array_remaining.pop();
                let finished = self.array_accum.pop().unwrap();
                self.result = Some(Value::Array(finished));

                if let Some(parent) = self.array_accum.last_mut() {
                    parent.push(self.result.take().unwrap());
                }
            }
        }

        self.array_remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> (Vec<(usize, ParseStatus)>, Option<Value>) {
        let mut parser = Parser::new();
        let mut events = Vec::new();
        let mut offset = 0;
        loop {
            let (consumed, status) = parser.parse(&input[offset..]);
            offset += consumed;
            events.push((consumed, status));
            match status {
                ParseStatus::Completed => return (events, parser.take_result()),
                ParseStatus::Error => return (events, None),
                ParseStatus::Incomplete => {
                    if offset >= input.len() {
                        return (events, None);
                    }
                }
            }
        }
    }

    #[test]
    fn e1_simple_string() {
        let (_, v) = parse_all(b"+PONG\r\n");
        let v = v.unwrap();
        assert_eq!(v, Value::bytes("PONG"));
        assert!(v.is_ok());
        assert!(!v.is_error());
    }

    #[test]
    fn e2_error() {
        let (_, v) = parse_all(b"-ERR unknown command\r\n");
        let v = v.unwrap();
        assert_eq!(v, Value::error("ERR unknown command"));
        assert!(v.is_error());
    }

    #[test]
    fn e3_negative_integer() {
        let (_, v) = parse_all(b":-123\r\n");
        assert_eq!(v.unwrap(), Value::Int(-123));
    }

    #[test]
    fn e4_binary_safe_bulk_string() {
        let (_, v) = parse_all(b"$5\r\nhel\r\n\r\n");
        assert_eq!(v.unwrap(), Value::bytes(b"hel\r\n".to_vec()));
    }

    #[test]
    fn e5_mixed_array() {
        let (_, v) = parse_all(b"*3\r\n:1\r\n:2\r\n$3\r\nfoo\r\n");
        assert_eq!(
            v.unwrap(),
            Value::array(vec![Value::Int(1), Value::Int(2), Value::bytes("foo")])
        );
    }

    #[test]
    fn null_bulk_and_array() {
        let (_, v) = parse_all(b"$-1\r\n");
        assert_eq!(v.unwrap(), Value::Null);
        let (_, v) = parse_all(b"*-1\r\n");
        assert_eq!(v.unwrap(), Value::Null);
    }

    #[test]
    fn empty_array() {
        let (_, v) = parse_all(b"*0\r\n");
        assert_eq!(v.unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn every_chunk_split_of_a_frame_yields_the_same_result() {
        let input: &[u8] = b"*2\r\n$3\r\nfoo\r\n:42\r\n";
        let expected = Value::array(vec![Value::bytes("foo"), Value::Int(42)]);

        for split in 0..=input.len() {
            let mut parser = Parser::new();
            let (first, chunk) = input.split_at(split);

            let (c1, s1) = parser.parse(first);
            if split == input.len() {
                assert_eq!(s1, ParseStatus::Completed, "split at {split}");
                assert_eq!(c1, first.len());
                assert_eq!(parser.take_result().unwrap(), expected);
                continue;
            }
            assert_eq!(s1, ParseStatus::Incomplete, "split at {split}");
            assert_eq!(c1, first.len());

            let (c2, s2) = parser.parse(chunk);
            assert_eq!(s2, ParseStatus::Completed, "split at {split}");
            assert_eq!(c2, chunk.len());
            assert_eq!(parser.take_result().unwrap(), expected);
        }
    }

    #[test]
    fn binary_safety_all_byte_values() {
        let mut body: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        let mut input = format!("${}\r\n", body.len()).into_bytes();
        input.append(&mut body.clone());
        input.extend_from_slice(b"\r\n");

        let (_, v) = parse_all(&input);
        assert_eq!(v.unwrap(), Value::bytes(body));
    }

    #[test]
    fn malformed_inputs_never_complete() {
        let bad_inputs: &[&[u8]] = &[
            b"@nope\r\n",
            b"$abc\r\nxx\r\n",
            b"$3\r\nfoo\n\r\n", // mismatched CRLF after body
            b"$-5\r\n",
            b"*-5\r\n",
            b":\r\n",
        ];
        for input in bad_inputs {
            let mut parser = Parser::new();
            let (_, status) = parser.parse(input);
            assert_ne!(status, ParseStatus::Completed, "input {:?}", input);
        }
    }

    #[test]
    fn deeply_nested_arrays_place_children_at_correct_index() {
        const DEPTH: usize = 32;
        let mut input = Vec::new();
        for _ in 0..DEPTH {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":7\r\n");

        let (_, v) = parse_all(&input);
        let mut cur = v.unwrap();
        for _ in 0..DEPTH {
            let arr = cur.to_array();
            assert_eq!(arr.len(), 1);
            cur = arr.into_iter().next().unwrap();
        }
        assert_eq!(cur, Value::Int(7));
    }

    #[test]
    fn reset_clears_failed_state() {
        let mut parser = Parser::new();
        let (_, status) = parser.parse(b"@");
        assert_eq!(status, ParseStatus::Error);
        assert!(parser.last_error().is_some());
        parser.reset();
        assert!(parser.last_error().is_none());
        let (_, status) = parser.parse(b"+OK\r\n");
        assert_eq!(status, ParseStatus::Completed);
    }
}
