use flate2::{Decompress, FlushDecompress, Status};

use crate::error::Error;

/// Flush boundary marking the end of one logical message in the stream.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Output is grown in steps of this size while inflating.
const INFLATE_CHUNK: usize = 16 * 1024;

/// Reassembles a continuously-compressed gateway byte stream into discrete
/// JSON messages.
///
/// When stream compression is negotiated, socket frames are fragments of a
/// single zlib stream rather than independently compressed messages. Fragments
/// are buffered until one ends with the `00 00 FF FF` flush marker; only then
/// is the accumulated data pushed through the shared inflate context and
/// emitted as one UTF-8 message.
///
/// A malformed stream is fatal to the owning shard: the caller must close the
/// connection and reconnect rather than skip the frame, because the inflate
/// context is unrecoverable once desynchronized.
#[derive(Debug)]
pub struct ZlibStreamDecoder {
    inflate: Decompress,
    buffer: Vec<u8>,
    out: Vec<u8>,
}

impl Default for ZlibStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibStreamDecoder {
    pub fn new() -> Self {
        Self {
            // zlib header is present on the stream
            inflate: Decompress::new(true),
            buffer: Vec::new(),
            out: Vec::with_capacity(INFLATE_CHUNK),
        }
    }

    /// Feed one socket frame. Returns a complete decompressed message when the
    /// fragment closes a flush boundary, `None` while the message is still
    /// partial.
    pub fn push(&mut self, fragment: &[u8]) -> crate::Result<Option<String>> {
        self.buffer.extend_from_slice(fragment);
        if self.buffer.len() < ZLIB_SUFFIX.len() || !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let data = std::mem::take(&mut self.buffer);
        self.inflate_all(&data)?;

        let raw = std::mem::replace(&mut self.out, Vec::with_capacity(INFLATE_CHUNK));
        let text = String::from_utf8(raw)
            .map_err(|_| Error::Compression("decompressed message is not valid UTF-8".into()))?;
        Ok(Some(text))
    }

    fn inflate_all(&mut self, data: &[u8]) -> crate::Result<()> {
        let mut offset = 0usize;
        loop {
            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            if self.out.len() == self.out.capacity() {
                self.out.reserve(INFLATE_CHUNK);
            }

            let status = self
                .inflate
                .decompress_vec(&data[offset..], &mut self.out, FlushDecompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;

            offset += (self.inflate.total_in() - before_in) as usize;
            let produced = self.inflate.total_out() > before_out;

            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError => {
                    if offset >= data.len() {
                        return Ok(());
                    }
                    // BufError with no progress on either side means the
                    // stream cannot advance: treat as malformed.
                    if status == Status::BufError
                        && !produced
                        && self.inflate.total_in() == before_in
                        && self.out.len() < self.out.capacity()
                    {
                        return Err(Error::Compression(
                            "inflate stalled on malformed stream".into(),
                        ));
                    }
                }
            }
        }
    }
}
