/// Encodes a value into the body of a frame.
pub trait Serialize<'a> {
    /// Writes the leading part of `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, it already contains the length prefix.
    ///
    /// # Returns
    /// A trailing chunk of bytes to be written right after `buf` without copying, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
