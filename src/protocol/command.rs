//! Decoded client commands.

use bytes::Bytes;
use std::fmt;

/// One request from a client: the command name followed by its arguments.
///
/// The decoder never produces an empty `Command`. The name is matched
/// case-insensitively by the executor; arguments are raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// Builds a command from string slices. Mostly useful in tests and benches.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::Command;
    /// let cmd = Command::from_strs(&["GET", "foo"]);
    /// assert_eq!(cmd.name_upper(), "GET");
    /// ```
    pub fn from_strs(args: &[&str]) -> Self {
        Self::new(
            args.iter()
                .map(|s| Bytes::copy_from_slice(s.as_bytes()))
                .collect(),
        )
    }

    /// The command name exactly as the client sent it.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default()
    }

    /// The command name upper-cased, used for dispatch.
    pub fn name_upper(&self) -> String {
        self.name().to_uppercase()
    }

    /// All arguments including the name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Number of arguments including the name.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn into_args(self) -> Vec<Bytes> {
        self.args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
