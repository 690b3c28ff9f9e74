// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Fixed-capacity ring-style buffer for framing reads and writes around
//! a `Socket` without extra heap churn per call. `N` is the
//! buffer's total capacity; data always occupies a contiguous slice
//! `[read_pos, write_pos)` that callers grow from either end via
//! `EnsureSpace`/`Commit` (filling) or shrink via `EnsureData`/`Skip`
//! (draining).

use std::cmp;

pub struct Buffer<const N: usize> {
    storage: Box<[u8; N]>,
    read_pos: usize,
    write_pos: usize,
}

impl<const N: usize> Buffer<N> {
    pub fn new() -> Buffer<N> {
        Buffer {
            storage: Box::new([0u8; N]),
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently available to read.
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The unread data, as a slice.
    pub fn data(&self) -> &[u8] {
        &self.storage[self.read_pos..self.write_pos]
    }

    /// Room left to write into without compacting first.
    pub fn space(&self) -> usize {
        N - self.write_pos
    }

    /// Ensure at least `want` unread bytes are available by reading
    /// from `filler` until satisfied, EOF, or the buffer is full.
    /// Returns the number of bytes available after filling, which may
    /// be less than `want` on EOF.
    pub fn ensure_data<F>(&mut self, want: usize, mut filler: F) -> std::io::Result<usize>
    where
        F: FnMut(&mut [u8]) -> std::io::Result<usize>,
    {
        while self.len() < want {
            if self.space() == 0 {
                self.compact();
                if self.space() == 0 {
                    break;
                }
            }
            let n = filler(&mut self.storage[self.write_pos..])?;
            if n == 0 {
                break;
            }
            self.write_pos += n;
        }
        Ok(self.len())
    }

    /// Discard `n` bytes from the front of the unread data.
    pub fn skip(&mut self, n: usize) {
        let n = cmp::min(n, self.len());
        self.read_pos += n;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Record that `n` bytes were just written into the slice returned
    /// by a prior `ensure_space`, extending the unread region.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.write_pos + n <= N);
        self.write_pos = cmp::min(self.write_pos + n, N);
    }

    /// Ensure at least `want` bytes of writable space after `write_pos`.
    /// If there's already enough room, returns it untouched. If
    /// compacting alone would free enough, compacts. Otherwise drains
    /// every unread byte out through `drainer` (typically a socket's
    /// `write_exactly`) and clears, reclaiming the buffer's full
    /// capacity. Returns `Ok(None)`, without calling `drainer`, when
    /// `want` exceeds the buffer's total capacity `N` and so can never
    /// be satisfied.
    pub fn ensure_space<F>(
        &mut self,
        want: usize,
        mut drainer: F,
    ) -> std::io::Result<Option<&mut [u8]>>
    where
        F: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        if self.space() >= want {
            return Ok(Some(&mut self.storage[self.write_pos..]));
        }
        if N - self.len() >= want {
            self.compact();
            return Ok(Some(&mut self.storage[self.write_pos..]));
        }
        if want > N {
            return Ok(None);
        }
        let pending = self.len();
        let drained = self.flush(&mut drainer)?;
        if drained != pending {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "ensure_space: drainer did not flush the whole buffer",
            ));
        }
        Ok(Some(&mut self.storage[self.write_pos..]))
    }

    /// Drain every unread byte out via `drainer`, which is called
    /// repeatedly with the remaining unread slice until it is empty or
    /// `drainer` writes 0 bytes (short write).
    pub fn flush<F>(&mut self, mut drainer: F) -> std::io::Result<usize>
    where
        F: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        let mut total = 0;
        while self.read_pos < self.write_pos {
            let n = drainer(&self.storage[self.read_pos..self.write_pos])?;
            if n == 0 {
                break;
            }
            self.read_pos += n;
            total += n;
        }
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
        Ok(total)
    }

    /// Slide the unread region down to offset 0, reclaiming space
    /// before `read_pos` for future writes.
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.storage.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// Discard all buffered data without touching the underlying
    /// storage contents.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }
}

impl<const N: usize> Default for Buffer<N> {
    fn default() -> Buffer<N> {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_drain(_: &[u8]) -> std::io::Result<usize> {
        panic!("drainer should not be called when space is already sufficient")
    }

    #[test]
    fn ensure_space_then_commit_extends_the_readable_region() {
        let mut buf: Buffer<16> = Buffer::new();
        let slice = buf.ensure_space(4, no_drain).unwrap().unwrap();
        slice[..4].copy_from_slice(b"abcd");
        buf.commit(4);
        assert_eq!(buf.data(), b"abcd");
    }

    #[test]
    fn skip_past_all_data_resets_to_empty() {
        let mut buf: Buffer<16> = Buffer::new();
        buf.ensure_space(3, no_drain).unwrap().unwrap()[..3].copy_from_slice(b"xyz");
        buf.commit(3);
        buf.skip(3);
        assert!(buf.is_empty());
        assert_eq!(buf.space(), 16);
    }

    #[test]
    fn compact_reclaims_space_consumed_by_skip() {
        let mut buf: Buffer<8> = Buffer::new();
        buf.ensure_space(8, no_drain).unwrap().unwrap()[..8].copy_from_slice(b"abcdefgh");
        buf.commit(8);
        buf.skip(4);
        assert_eq!(buf.space(), 0);
        buf.compact();
        assert_eq!(buf.space(), 4);
        assert_eq!(buf.data(), b"efgh");
    }

    #[test]
    fn ensure_space_compacts_instead_of_draining_when_that_alone_is_enough() {
        let mut buf: Buffer<8> = Buffer::new();
        buf.ensure_space(6, no_drain).unwrap().unwrap()[..6].copy_from_slice(b"abcdef");
        buf.commit(6);
        buf.skip(4);
        // 2 bytes unread, 2 bytes free at the tail: compacting alone
        // frees the 4 bytes `want` needs, so `drainer` must not run.
        let slice = buf.ensure_space(4, no_drain).unwrap().unwrap();
        assert!(slice.len() >= 4);
        assert_eq!(buf.data(), b"ef");
    }

    #[test]
    fn ensure_space_drains_buffered_data_through_the_writer_when_compaction_is_not_enough() {
        let mut buf: Buffer<8> = Buffer::new();
        buf.ensure_space(8, no_drain).unwrap().unwrap()[..8].copy_from_slice(b"abcdefgh");
        buf.commit(8);

        let drained = std::cell::RefCell::new(Vec::new());
        let slice = buf
            .ensure_space(5, |chunk| {
                drained.borrow_mut().extend_from_slice(chunk);
                Ok(chunk.len())
            })
            .unwrap()
            .unwrap();

        assert_eq!(*drained.borrow(), b"abcdefgh");
        assert_eq!(slice.len(), 8);
        assert!(buf.is_empty());
    }

    #[test]
    fn ensure_space_rejects_a_request_larger_than_capacity() {
        let mut buf: Buffer<8> = Buffer::new();
        let result = buf.ensure_space(9, no_drain).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn ensure_data_reads_until_want_is_satisfied() {
        let mut buf: Buffer<16> = Buffer::new();
        let mut source: &[u8] = b"hello world";
        let got = buf
            .ensure_data(5, |dst| std::io::Read::read(&mut source, dst))
            .unwrap();
        assert!(got >= 5);
        assert_eq!(&buf.data()[..5], b"hello");
    }

    #[test]
    fn flush_drains_until_the_writer_reports_zero() {
        let mut buf: Buffer<16> = Buffer::new();
        buf.ensure_space(5, no_drain).unwrap().unwrap()[..5].copy_from_slice(b"abcde");
        buf.commit(5);
        let mut sink = Vec::new();
        let n = buf
            .flush(|chunk| {
                sink.extend_from_slice(chunk);
                Ok(chunk.len())
            })
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(sink, b"abcde");
        assert!(buf.is_empty());
    }
}
