// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Checked big-endian readers and writers shared by the codec modules.
//!
//! All multi-byte integers on the wire are big-endian; strings and byte
//! arrays carry a u32 length prefix. `bytes::Buf` panics on underflow, so
//! every read here verifies `remaining()` first and surfaces a
//! [`CodecError::Truncated`] instead.

use bytes::{Buf, BufMut, BytesMut};

use crate::CodecError;

pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, field: &'static str) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            return Err(CodecError::Truncated(field));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn i8(&mut self, field: &'static str) -> Result<i8, CodecError> {
        self.need(1, field)?;
        Ok(self.buf.get_i8())
    }

    pub(crate) fn bool(&mut self, field: &'static str) -> Result<bool, CodecError> {
        Ok(self.u8(field)? != 0)
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        self.need(2, field)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn i16(&mut self, field: &'static str) -> Result<i16, CodecError> {
        self.need(2, field)?;
        Ok(self.buf.get_i16())
    }

    pub(crate) fn i32(&mut self, field: &'static str) -> Result<i32, CodecError> {
        self.need(4, field)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        self.need(4, field)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn i64(&mut self, field: &'static str) -> Result<i64, CodecError> {
        self.need(8, field)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn u64(&mut self, field: &'static str) -> Result<u64, CodecError> {
        self.need(8, field)?;
        Ok(self.buf.get_u64())
    }

    pub(crate) fn f32(&mut self, field: &'static str) -> Result<f32, CodecError> {
        self.need(4, field)?;
        Ok(self.buf.get_f32())
    }

    pub(crate) fn f64(&mut self, field: &'static str) -> Result<f64, CodecError> {
        self.need(8, field)?;
        Ok(self.buf.get_f64())
    }

    pub(crate) fn byte_array(&mut self, field: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.u32(field)? as usize;
        if self.buf.remaining() < len {
            return Err(CodecError::BadLength {
                field,
                declared: len,
                remaining: self.buf.remaining(),
            });
        }
        let mut out = vec![0u8; len];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub(crate) fn string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let raw = self.byte_array(field)?;
        String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8(field))
    }
}

pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

pub(crate) fn put_byte_array(buf: &mut BytesMut, b: &[u8]) {
    buf.put_u32(b.len() as u32);
    buf.put_slice(b);
}
