//! Byte sources a package can be read from.

use std::{
    fs::File,
    io::{self, BufReader, Cursor, Read, Seek, SeekFrom},
};

/// The stream behind a loaded package
#[derive(Debug)]
pub enum Source {
    /// A package file on disk
    File(BufReader<File>),
    /// A package held in memory
    Memory(Cursor<Vec<u8>>),
}

impl From<File> for Source {
    fn from(file: File) -> Self {
        Source::File(BufReader::new(file))
    }
}

impl From<Vec<u8>> for Source {
    fn from(bytes: Vec<u8>) -> Self {
        Source::Memory(Cursor::new(bytes))
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::File(file) => file.read(buf),
            Source::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for Source {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Source::File(file) => file.seek(pos),
            Source::Memory(cursor) => cursor.seek(pos),
        }
    }
}
