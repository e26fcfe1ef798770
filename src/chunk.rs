//! Splitting of finite, seekable sources into fixed size byte windows

use crate::error::{Error, Result};
use crate::model::ByteRange;
use bytes::Bytes;
use std::future::Future;
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Iterator over the inclusive windows `[0, size-1], [size, 2*size-1], ...` of a source of `length` bytes.
///
/// The final window is clamped to `length - 1` and is never empty. A zero `size` yields nothing.
#[derive(Debug, Clone)]
pub struct Windows {
    length: u64,
    size: u64,
    start: u64,
}

impl Iterator for Windows {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        if self.size == 0 || self.start >= self.length {
            return None;
        }

        let end = (self.start + self.size - 1).min(self.length - 1);
        let window = ByteRange::new(self.start, end);
        self.start += self.size;

        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.size {
            0 => 0,
            size => self.length.saturating_sub(self.start).div_ceil(size) as usize,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows {}

/// Windows of `size` bytes covering `[0, length)`
pub fn windows(length: u64, size: u64) -> Windows {
    Windows {
        length,
        size,
        start: 0,
    }
}

/// Windows of `size` bytes covering the inclusive `range`, with offsets relative to the start of the object
pub fn range_windows(range: ByteRange, size: u64) -> impl Iterator<Item = ByteRange> {
    let base = range.start;
    windows(range.end - range.start + 1, size).map(move |w| ByteRange::new(w.start + base, w.end + base))
}

/// Reads a seekable source one window at a time
pub struct ChunkReader<R> {
    reader: R,
    size: u64,
}

impl<R> ChunkReader<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    /// Create a reader producing chunks of `size` bytes
    pub fn new(reader: R, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("chunk size must be non-zero".to_string()));
        }

        Ok(Self { reader, size })
    }

    /// Length of the source; the reader's position is left where it was
    pub async fn length(&mut self) -> Result<u64> {
        seeker_length(&mut self.reader).await
    }

    /// Windows of the whole source, measured afresh on every call
    pub async fn windows(&mut self) -> Result<Windows> {
        let length = self.length().await?;
        Ok(windows(length, self.size))
    }

    /// Read the bytes of a single window
    pub async fn read_window(&mut self, window: ByteRange) -> Result<Bytes> {
        let len = (window.end - window.start + 1) as usize;
        let mut data = vec![0u8; len];

        self.reader.seek(SeekFrom::Start(window.start)).await?;
        self.reader.read_exact(&mut data).await?;

        Ok(Bytes::from(data))
    }

    /// Run `f` for every window, in order, with the window's data.
    ///
    /// The first error returned by `f` stops the iteration and is returned as is.
    pub async fn for_each<F, Fut>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(ByteRange, Bytes) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for window in self.windows().await? {
            let data = self.read_window(window).await?;
            f(window, data).await?;
        }

        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Determine the length of a seekable source without disturbing its position
pub async fn seeker_length<S>(seeker: &mut S) -> Result<u64>
where
    S: AsyncSeek + Unpin + Send,
{
    let position = seeker.stream_position().await?;
    let length = seeker.seek(SeekFrom::End(0)).await?;
    seeker.seek(SeekFrom::Start(position)).await?;

    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_windows_cover_source_exactly_once() {
        for length in 0..40u64 {
            for size in 1..10u64 {
                let all: Vec<ByteRange> = windows(length, size).collect();

                let mut next = 0;
                for w in &all {
                    assert_eq!(w.start, next);
                    assert!(w.end >= w.start);
                    next = w.end + 1;
                }
                assert_eq!(next, length);

                if let Some(last) = all.last() {
                    let expected = match length % size {
                        0 => size,
                        rem => rem,
                    };
                    assert_eq!(last.end - last.start + 1, expected);
                }

                assert_eq!(windows(length, size).len(), all.len());
            }
        }
    }

    #[test]
    fn test_zero_size_yields_nothing() {
        assert_eq!(windows(10, 0).count(), 0);
    }

    #[test]
    fn test_range_windows_are_offset() {
        let all: Vec<ByteRange> = range_windows(ByteRange::new(10, 24), 4).collect();
        assert_eq!(
            all,
            vec![
                ByteRange::new(10, 13),
                ByteRange::new(14, 17),
                ByteRange::new(18, 21),
                ByteRange::new(22, 24),
            ]
        );
    }

    #[tokio::test]
    async fn test_for_each_avoids_empty_chunk() {
        let cases: [(&[u8], usize, usize); 3] = [
            (b"datadata", 4, 2),
            (b"d", 1, 1),
            (b"datadatad", 5, 1),
        ];

        for (data, chunks, last_size) in cases {
            let mut reader = ChunkReader::new(Cursor::new(data.to_vec()), 2).unwrap();
            let mut all = Vec::new();

            reader
                .for_each(|_, chunk| {
                    all.push(chunk);
                    async { Ok(()) }
                })
                .await
                .unwrap();

            assert_eq!(all.len(), chunks);
            assert_eq!(all.last().unwrap().len(), last_size);
            assert_eq!(all.concat(), data);
        }
    }

    #[tokio::test]
    async fn test_length_preserves_position() {
        let mut cursor = Cursor::new(b"0123456789".to_vec());
        cursor.set_position(3);

        let mut reader = ChunkReader::new(cursor, 4).unwrap();
        assert_eq!(reader.length().await.unwrap(), 10);
        assert_eq!(reader.into_inner().position(), 3);
    }

    #[tokio::test]
    async fn test_for_each_error_is_returned() {
        let mut reader = ChunkReader::new(Cursor::new(vec![0u8; 10]), 3).unwrap();
        let mut calls = 0;

        let err = reader
            .for_each(|_, _| {
                calls += 1;
                async { Err(Error::Halt) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Halt));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ChunkReader::new(Cursor::new(Vec::<u8>::new()), 0).is_err());
    }
}
