use std::borrow::Cow;

/// An opaque, binary-safe payload used for command names and arguments.
///
/// Read-only after construction; exposes its length and a zero-copy view of
/// its bytes. Backed by `Cow<'static, [u8]>` so a `'static` byte slice
/// (a string literal, a `include_bytes!` constant, ...) can be wrapped
/// without copying, while text and owned byte sequences still allocate
/// exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Buffer(Cow<'static, [u8]>);

impl Buffer {
    /// Wraps a borrowed `'static` byte slice with no copy — the equivalent
    /// of the original's borrowed-pointer-plus-length constructor.
    pub fn from_static(bytes: &'static [u8]) -> Buffer {
        Buffer(Cow::Borrowed(bytes))
    }

    /// Builds a `Buffer` from an owned byte sequence.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Buffer {
        Buffer(Cow::Owned(bytes.into()))
    }

    /// Builds a `Buffer` from owned or borrowed text, copying it.
    pub fn from_str(s: impl AsRef<str>) -> Buffer {
        Buffer(Cow::Owned(s.as_ref().as_bytes().to_vec()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zero-copy view of the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_owned()
    }
}

impl From<&str> for Buffer {
    fn from(s: &str) -> Buffer {
        Buffer::from_str(s)
    }
}

impl From<String> for Buffer {
    fn from(s: String) -> Buffer {
        Buffer(Cow::Owned(s.into_bytes()))
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(b: Vec<u8>) -> Buffer {
        Buffer(Cow::Owned(b))
    }
}

impl From<&'static [u8]> for Buffer {
    fn from(b: &'static [u8]) -> Buffer {
        Buffer::from_static(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_and_from_bytes_agree() {
        let a = Buffer::from_str("SET");
        let b = Buffer::from_bytes(b"SET".to_vec());
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(!a.is_empty());
    }

    #[test]
    fn binary_safe() {
        let b = Buffer::from_bytes(vec![0, 1, 2, b'\r', b'\n', 255]);
        assert_eq!(b.len(), 6);
        assert_eq!(b.as_bytes(), &[0, 1, 2, b'\r', b'\n', 255][..]);
    }

    #[test]
    fn from_static_borrows_without_copying() {
        static PING: &[u8] = b"PING";
        let b = Buffer::from_static(PING);
        assert_eq!(b.as_bytes(), b"PING");
        assert!(matches!(b.0, Cow::Borrowed(_)));
    }
}
