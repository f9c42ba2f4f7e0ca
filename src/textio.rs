//! Text formats for the on-disk artifacts
//!
//! Every artifact (LT code, sparse code, PRG graph, circuit) is stored as
//! whitespace-separated decimal fields: a small header of counts followed by
//! the payload. [`TokenStream`] slurps a reader once and then hands out
//! parsed tokens; the per-type `save_to`/`load_from` methods live with their
//! types and use these helpers. Saved files are load-roundtrip exact for
//! their declared parameters.

use std::io::{self, Read, Write};

use crate::field::Zp;

/// Errors from parsing an artifact file.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("unexpected end of input")]
    Eof,
    #[error("malformed token `{0}`")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A whitespace-separated token cursor over a fully-read input.
pub struct TokenStream {
    data: String,
    pos: usize,
}

impl TokenStream {
    /// Read everything from `reader` and position the cursor at the start.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, TextError> {
        let mut data = String::new();
        reader.read_to_string(&mut data)?;
        Ok(TokenStream { data, pos: 0 })
    }

    fn next_token(&mut self) -> Option<&str> {
        let bytes = self.data.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos == bytes.len() {
            return None;
        }
        let start = self.pos;
        while self.pos < bytes.len() && !bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        Some(&self.data[start..self.pos])
    }

    /// The next token parsed as `usize`.
    pub fn next_usize(&mut self) -> Result<usize, TextError> {
        let token = self.next_token().ok_or(TextError::Eof)?;
        token
            .parse::<usize>()
            .map_err(|_| TextError::Malformed(token.to_owned()))
    }

    /// The next token parsed as `u64`.
    pub fn next_u64(&mut self) -> Result<u64, TextError> {
        let token = self.next_token().ok_or(TextError::Eof)?;
        token
            .parse::<u64>()
            .map_err(|_| TextError::Malformed(token.to_owned()))
    }

    /// The next token parsed as a field element. Values are read as `u64`,
    /// truncated to a word and reduced, so any decimal in range round-trips.
    pub fn next_zp(&mut self) -> Result<Zp, TextError> {
        Ok(Zp::new(self.next_u64()? as u32))
    }

    /// Fill `out` from the next `out.len()` tokens.
    pub fn fill_usize(&mut self, out: &mut [usize]) -> Result<(), TextError> {
        for slot in out {
            *slot = self.next_usize()?;
        }
        Ok(())
    }

    /// Fill `out` with the next `out.len()` field elements.
    pub fn fill_zp(&mut self, out: &mut [Zp]) -> Result<(), TextError> {
        for slot in out {
            *slot = self.next_zp()?;
        }
        Ok(())
    }
}

/// Write a space-separated run of `usize` values followed by a newline.
/// Empty runs produce nothing, matching the load side exactly.
pub fn write_usize_line<W: Write>(w: &mut W, values: &[usize]) -> io::Result<()> {
    let mut first = true;
    for v in values {
        if first {
            write!(w, "{v}")?;
            first = false;
        } else {
            write!(w, " {v}")?;
        }
    }
    if !first {
        writeln!(w)?;
    }
    Ok(())
}
