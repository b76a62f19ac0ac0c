//! The code listing: a human-readable annotated disassembly of one
//! compiled unit, written alongside the resource images when `-l` is
//! given.
//!
//! `ListingSink` is the seam; `NullSink` discards everything (the
//! default when no listing was requested) and `FileSink` writes a
//! `.lst` file, keeping the listing logic itself independent of
//! whether a file is actually open.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::ir::mnemonic;

/// Where listing output goes. Every method takes the byte offset the
/// entry starts at so columns line up regardless of how it was split
/// across calls.
pub trait ListingSink {
    fn list_op(&mut self, offset: usize, op: u8);
    fn list_word(&mut self, offset: usize, word: u16);
    fn list_byte(&mut self, offset: usize, byte: u8);
    fn list_offset(&mut self, offset: usize, target: usize);
    fn list_text(&mut self, offset: usize, text: &str);
    fn list_source_line(&mut self, line: u32);
}

/// Discards all listing output. Used when no listing was requested,
/// so the rest of the pipeline never needs an `Option<dyn ...>`.
#[derive(Default)]
pub struct NullSink;

impl ListingSink for NullSink {
    fn list_op(&mut self, _offset: usize, _op: u8) {}
    fn list_word(&mut self, _offset: usize, _word: u16) {}
    fn list_byte(&mut self, _offset: usize, _byte: u8) {}
    fn list_offset(&mut self, _offset: usize, _target: usize) {}
    fn list_text(&mut self, _offset: usize, _text: &str) {}
    fn list_source_line(&mut self, _line: u32) {}
}

/// Writes a plain-text listing to a file, one line per entry.
pub struct FileSink {
    out: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(FileSink {
            out: BufWriter::new(File::create(path)?),
        })
    }

    fn line(&mut self, offset: usize, body: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{offset:06x}\t{body}");
    }
}

impl ListingSink for FileSink {
    fn list_op(&mut self, offset: usize, op: u8) {
        self.line(offset, format_args!("{}", mnemonic(op)));
    }

    fn list_word(&mut self, offset: usize, word: u16) {
        self.line(offset, format_args!(".word\t{word:#06x}"));
    }

    fn list_byte(&mut self, offset: usize, byte: u8) {
        self.line(offset, format_args!(".byte\t{byte:#04x}"));
    }

    fn list_offset(&mut self, offset: usize, target: usize) {
        self.line(offset, format_args!("-> {target:#06x}"));
    }

    fn list_text(&mut self, offset: usize, text: &str) {
        self.line(offset, format_args!(".text\t{text:?}"));
    }

    fn list_source_line(&mut self, line: u32) {
        let _ = writeln!(self.out, "; line {line}");
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_writes_mnemonics_and_operands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.lst");
        {
            let mut sink = FileSink::create(&path).unwrap();
            sink.list_op(0, crate::ir::opcode::OP_ADD);
            sink.list_word(1, 0x1234);
            sink.list_source_line(42);
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("add"));
        assert!(contents.contains("1234"));
        assert!(contents.contains("line 42"));
    }

    #[test]
    fn null_sink_accepts_everything_without_panicking() {
        let mut sink = NullSink;
        sink.list_op(0, 0);
        sink.list_word(0, 0);
        sink.list_byte(0, 0);
        sink.list_offset(0, 0);
        sink.list_text(0, "x");
        sink.list_source_line(1);
    }
}
