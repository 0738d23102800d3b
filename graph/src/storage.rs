//! Self-describing binary codec for integers, strings and tensors.
//!
//! All scalars are little-endian; tensor payloads are the raw row-major
//! `f32` data. The distributed layer ships whole weight sets through this
//! codec, and the round trip is bit-exact.

use std::fmt;
use std::io::{self, Read, Write};

use crate::tensor::Tensor;

#[derive(Debug)]
pub enum CodecError {
    Io(io::Error),
    Malformed(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Malformed(what) => write!(f, "malformed stream: {what}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Malformed(_) => None,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

pub fn write_int<W: Write>(value: i32, out: &mut W) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub fn read_int<R: Read>(input: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_string<W: Write>(value: &str, out: &mut W) -> io::Result<()> {
    write_int(value.len() as i32, out)?;
    out.write_all(value.as_bytes())
}

pub fn read_string<R: Read>(input: &mut R) -> Result<String> {
    let len = read_int(input)?;
    if len < 0 {
        return Err(CodecError::Malformed("negative string length"));
    }
    let mut buf = vec![0u8; len as usize];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| CodecError::Malformed("invalid utf-8"))
}

pub fn write_tensor<W: Write>(tensor: &Tensor, out: &mut W) -> io::Result<()> {
    let (rows, cols) = tensor.dim();
    write_int(rows as i32, out)?;
    write_int(cols as i32, out)?;
    match tensor.as_slice() {
        Some(data) => out.write_all(bytemuck::cast_slice(data)),
        // Non-contiguous views are serialized element by element.
        None => {
            for &v in tensor.iter() {
                out.write_all(&v.to_le_bytes())?;
            }
            Ok(())
        }
    }
}

pub fn read_tensor<R: Read>(input: &mut R) -> Result<Tensor> {
    let rows = read_int(input)?;
    let cols = read_int(input)?;
    if rows < 0 || cols < 0 {
        return Err(CodecError::Malformed("negative tensor dimension"));
    }
    let (rows, cols) = (rows as usize, cols as usize);

    let mut data = vec![0f32; rows * cols];
    input.read_exact(bytemuck::cast_slice_mut(&mut data))?;
    Tensor::from_shape_vec((rows, cols), data)
        .map_err(|_| CodecError::Malformed("tensor shape/data mismatch"))
}

/// Writes a complete weight set: a count followed by each tensor.
pub fn write_weights<W: Write>(tensors: &[&Tensor], out: &mut W) -> io::Result<()> {
    write_int(tensors.len() as i32, out)?;
    for t in tensors {
        write_tensor(t, out)?;
    }
    Ok(())
}

/// Reads a complete weight set written by [`write_weights`].
pub fn read_weights<R: Read>(input: &mut R) -> Result<Vec<Tensor>> {
    let count = read_int(input)?;
    if count < 0 {
        return Err(CodecError::Malformed("negative weight count"));
    }
    let mut tensors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        tensors.push(read_tensor(input)?);
    }
    Ok(tensors)
}
