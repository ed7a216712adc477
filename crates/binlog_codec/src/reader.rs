//! Bounds-checked cursor over a record body.

use crate::error::{CodecError, CodecResult};
use bytes::Buf;

/// A cursor that turns every short read into [`CodecError::Truncated`]
/// instead of panicking the way raw [`Buf`] getters do.
pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> CodecResult<()> {
        if self.buf.remaining() < n {
            return Err(CodecError::truncated(n, self.buf.remaining()));
        }
        Ok(())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub(crate) fn u8(&mut self) -> CodecResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self) -> CodecResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn u32(&mut self) -> CodecResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn i32(&mut self) -> CodecResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub(crate) fn u48(&mut self) -> CodecResult<u64> {
        self.need(6)?;
        Ok(self.buf.get_uint_le(6))
    }

    pub(crate) fn u64(&mut self) -> CodecResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub(crate) fn i64(&mut self) -> CodecResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub(crate) fn bytes(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    pub(crate) fn string(&mut self, n: usize) -> CodecResult<String> {
        let raw = self.bytes(n)?;
        utf8(raw)
    }

    pub(crate) fn rest_string(&mut self) -> CodecResult<String> {
        let raw = self.rest();
        utf8(raw)
    }

    /// Consumes a single zero terminator.
    pub(crate) fn nul(&mut self) -> CodecResult<()> {
        match self.u8()? {
            0 => Ok(()),
            other => Err(CodecError::malformed(format!(
                "expected NUL terminator, found {other:#04x}"
            ))),
        }
    }

    pub(crate) fn finish(&self, what: &str) -> CodecResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::malformed(format!(
                "{} trailing bytes in {what} body",
                self.buf.len()
            )))
        }
    }
}

fn utf8(raw: &[u8]) -> CodecResult<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| CodecError::malformed(format!("invalid UTF-8: {e}")))
}
