use std::io;

/// Decodes a value borrowing from the body of a received frame.
pub trait Deserialize<'a>: Sized {
    /// Parses `buf`, a 4 byte aligned frame body.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
