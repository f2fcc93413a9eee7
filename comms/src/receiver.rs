//! The receiving end of the framed protocol.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits to receive a new message from the inner reader.
    ///
    /// The frame is read into `buf`, an `f32` buffer so that its start is 4 bytes
    /// aligned and float payloads can be borrowed from it without copying.
    ///
    /// # Arguments
    /// * `buf` - The buffer to use for deserialization, the returned
    ///           `T`'s lifetimes will be tied to this buffer.
    ///
    /// # Returns
    /// The decoded message or an io error, `UnexpectedEof` when the peer went away.
    pub async fn recv_into<'buf, T>(&mut self, buf: &'buf mut Vec<f32>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
    {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;
        let len = LenType::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        buf.clear();
        buf.resize(len.div_ceil(size_of::<f32>()), 0.);

        let bytes: &'buf mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
        let body = &mut bytes[..len];
        self.rx.read_exact(body).await?;

        T::deserialize(body)
    }
}
