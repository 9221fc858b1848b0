use crate::buffer::Buffer;

/// An ordered sequence of `Buffer`s with at least one element: element 0 is
/// the command name, the rest are its arguments.
#[derive(Clone, Debug)]
pub struct Command(Vec<Buffer>);

impl Command {
    /// Builds a command from a name and its arguments.
    pub fn new(name: impl Into<Buffer>, args: impl IntoIterator<Item = Buffer>) -> Command {
        let mut parts = Vec::with_capacity(1 + args.into_iter().size_hint().0);
        parts.push(name.into());
        parts.extend(args);
        Command(parts)
    }

    /// Builds a command directly from a non-empty vector of buffers.
    ///
    /// # Panics
    /// Panics if `parts` is empty — a `Command` must name at least itself.
    pub fn from_parts(parts: Vec<Buffer>) -> Command {
        assert!(!parts.is_empty(), "a Command needs at least a name");
        Command(parts)
    }

    pub fn name(&self) -> &Buffer {
        &self.0[0]
    }

    pub fn args(&self) -> &[Buffer] {
        &self.0[1..]
    }

    pub fn parts(&self) -> &[Buffer] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_args_split_correctly() {
        let cmd = Command::new("SET", vec![Buffer::from_str("key"), Buffer::from_str("val")]);
        assert_eq!(cmd.name().as_bytes(), b"SET");
        assert_eq!(cmd.args().len(), 2);
        assert_eq!(cmd.parts().len(), 3);
    }

    #[test]
    #[should_panic]
    fn from_parts_rejects_empty() {
        Command::from_parts(Vec::new());
    }
}
