use std::io;

/// Types that can be rebuilt from the body of a frame, possibly borrowing from it.
pub trait Deserialize<'a>: Sized {
    /// Decodes a message from `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame body, 4 bytes aligned at its start.
    ///
    /// # Returns
    /// The decoded message or an `InvalidData` io error.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
