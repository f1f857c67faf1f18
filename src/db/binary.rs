//! Typed little-endian reader/writer over a single database file.
//!
//! The legacy formats embed a third-party runtime's binary conventions
//! (ULEB128 length-prefixed strings behind a presence byte, hashes stored
//! either as raw digests or hex text). Shaping the reader around those
//! conventions keeps all on-disk schema knowledge in one place.
//!
//! Both ends are "once bad, always bad": the first failure is latched, every
//! further read is a no-op returning zero, and the latched error stays
//! observable through [`Reader::error`] after the parse. Callers can walk an
//! entire record unchecked and test [`Reader::good`] once at the end.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::hash::{ContentHash, HASH_LEN};

/// Result for Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can arise from reading or writing binary database data
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("string conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("uleb error")]
    UlebOverflow,

    #[error("invalid string status char: {0}")]
    InvalidStringStatusChar(u8),
}

macro_rules! impl_read {
    ($name:ident, $ty:ty, $read:ident) => {
        /// Read a little-endian value, or zero once the reader has failed.
        pub fn $name(&mut self) -> $ty {
            self.try_read(std::mem::size_of::<$ty>() as u64, |r| {
                Ok(r.$read::<LittleEndian>()?)
            })
        }
    };
}

macro_rules! impl_write {
    ($name:ident, $ty:ty, $write:ident) => {
        /// Write a little-endian value. A no-op once the writer has failed.
        pub fn $name(&mut self, value: $ty) {
            self.try_write(|w| Ok(w.$write::<LittleEndian>(value)?));
        }
    };
}

/// Byte-oriented reader over a database file.
///
/// Opening never fails: a missing or unreadable file produces a reader with
/// `total_size == 0` whose state is already bad, which the loaders treat as
/// "nothing to load".
pub struct Reader {
    inner: Option<BufReader<File>>,
    state: Result<()>,
    position: u64,

    /// Size of the underlying file in bytes, for progress accounting.
    pub total_size: u64,
}

impl Reader {
    /// Open a file for reading.
    pub fn open(path: impl AsRef<Path>) -> Reader {
        match File::open(path.as_ref()) {
            Ok(file) => {
                let total_size = file.metadata().map(|m| m.len()).unwrap_or(0);
                Reader {
                    inner: Some(BufReader::new(file)),
                    state: Ok(()),
                    position: 0,
                    total_size,
                }
            }
            Err(err) => Reader {
                inner: None,
                state: Err(err.into()),
                position: 0,
                total_size: 0,
            },
        }
    }

    /// Whether no read has failed so far.
    pub fn good(&self) -> bool {
        self.state.is_ok()
    }

    /// The latched error, if any read has failed.
    pub fn error(&self) -> Option<&Error> {
        self.state.as_ref().err()
    }

    /// Bytes consumed so far, for progress accounting.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn try_read<T: Default>(
        &mut self,
        size: u64,
        f: impl FnOnce(&mut BufReader<File>) -> Result<T>,
    ) -> T {
        if self.state.is_err() {
            return T::default();
        }
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return T::default(),
        };
        match f(inner) {
            Ok(value) => {
                self.position += size;
                value
            }
            Err(err) => {
                self.state = Err(err);
                T::default()
            }
        }
    }

    /// Read a single byte, or zero once the reader has failed.
    pub fn read_u8(&mut self) -> u8 {
        self.try_read(1, |r| Ok(r.read_u8()?))
    }

    impl_read!(read_u16, u16, read_u16);
    impl_read!(read_u32, u32, read_u32);
    impl_read!(read_u64, u64, read_u64);
    impl_read!(read_i16, i16, read_i16);
    impl_read!(read_i32, i32, read_i32);
    impl_read!(read_i64, i64, read_i64);
    impl_read!(read_f32, f32, read_f32);
    impl_read!(read_f64, f64, read_f64);

    /// Skip `n` bytes.
    pub fn skip_bytes(&mut self, n: u64) {
        self.try_read(n, |r| {
            let copied = io::copy(&mut r.by_ref().take(n), &mut io::sink())?;
            if copied != n {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            Ok(())
        });
    }

    /// Fill `buf` from the stream, returning the number of bytes read
    /// (zero once the reader has failed).
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len();
        self.try_read(n as u64, |r| {
            r.read_exact(buf)?;
            Ok(n)
        })
    }

    /// Read an unsigned LEB128 value.
    pub fn read_uleb128(&mut self) -> u64 {
        if self.state.is_err() {
            return 0;
        }
        let (value, size) = {
            let inner = match self.inner.as_mut() {
                Some(inner) => inner,
                None => return 0,
            };
            match read_uleb128_raw(inner) {
                Ok(pair) => pair,
                Err(err) => {
                    self.state = Err(err);
                    return 0;
                }
            }
        };
        self.position += size;
        value
    }

    /// Read a length-prefixed string: a presence byte (0x0b when a string
    /// follows, 0x00 for "absent"), then a ULEB128 length and the UTF-8
    /// bytes.
    pub fn read_string(&mut self) -> String {
        match self.read_u8() {
            0x00 => String::new(),
            0x0b => {
                let len = self.read_uleb128();
                if len == 0 {
                    return String::new();
                }
                let mut buf = vec![0_u8; len as usize];
                self.read_bytes(&mut buf);
                if self.state.is_err() {
                    return String::new();
                }
                match String::from_utf8(buf) {
                    Ok(s) => s,
                    Err(err) => {
                        self.state = Err(err.into());
                        String::new()
                    }
                }
            }
            other => {
                if self.state.is_ok() {
                    self.state = Err(Error::InvalidStringStatusChar(other));
                }
                String::new()
            }
        }
    }

    /// Consume a length-prefixed string without building it.
    pub fn skip_string(&mut self) {
        match self.read_u8() {
            0x00 => {}
            0x0b => {
                let len = self.read_uleb128();
                self.skip_bytes(len);
            }
            other => {
                if self.state.is_ok() {
                    self.state = Err(Error::InvalidStringStatusChar(other));
                }
            }
        }
    }

    /// Read a hash stored as its raw digest bytes.
    pub fn read_hash_digest(&mut self) -> ContentHash {
        let mut buf = [0_u8; HASH_LEN];
        self.read_bytes(&mut buf);
        ContentHash(buf)
    }

    /// Read a hash stored as a 32-character hex string (the older persisted
    /// form). An unparseable hex payload yields the zero hash without
    /// failing the reader; the bytes were consumed fine, only the content
    /// is bad, and zero hashes trigger recomputation downstream.
    pub fn read_hash_chars(&mut self) -> ContentHash {
        let text = self.read_string();
        ContentHash::from_hex(&text).unwrap_or(ContentHash::ZERO)
    }
}

/// Byte-oriented writer over a database file.
///
/// Mirrors [`Reader`]: creating the writer never fails, and the first write
/// error is latched.
pub struct Writer {
    inner: Option<BufWriter<File>>,
    state: Result<()>,
}

impl Writer {
    /// Create (truncate) a file for writing.
    pub fn create(path: impl AsRef<Path>) -> Writer {
        match File::create(path.as_ref()) {
            Ok(file) => Writer {
                inner: Some(BufWriter::new(file)),
                state: Ok(()),
            },
            Err(err) => Writer {
                inner: None,
                state: Err(err.into()),
            },
        }
    }

    /// Whether no write has failed so far.
    pub fn good(&self) -> bool {
        self.state.is_ok()
    }

    /// The latched error, if any write has failed.
    pub fn error(&self) -> Option<&Error> {
        self.state.as_ref().err()
    }

    fn try_write(&mut self, f: impl FnOnce(&mut BufWriter<File>) -> Result<()>) {
        if self.state.is_err() {
            return;
        }
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return,
        };
        if let Err(err) = f(inner) {
            self.state = Err(err);
        }
    }

    /// Write a single byte. A no-op once the writer has failed.
    pub fn write_u8(&mut self, value: u8) {
        self.try_write(|w| Ok(w.write_u8(value)?));
    }

    impl_write!(write_u16, u16, write_u16);
    impl_write!(write_u32, u32, write_u32);
    impl_write!(write_u64, u64, write_u64);
    impl_write!(write_i16, i16, write_i16);
    impl_write!(write_i32, i32, write_i32);
    impl_write!(write_i64, i64, write_i64);
    impl_write!(write_f32, f32, write_f32);
    impl_write!(write_f64, f64, write_f64);

    /// Write a raw byte span.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.try_write(|w| Ok(w.write_all(data)?));
    }

    /// Write an unsigned LEB128 value.
    pub fn write_uleb128(&mut self, mut value: u64) {
        self.try_write(|w| {
            loop {
                let mut byte = (value & 0x7f) as u8;
                value >>= 7;
                if value != 0 {
                    byte |= 0x80;
                }
                w.write_u8(byte)?;
                if value == 0 {
                    break;
                }
            }
            Ok(())
        });
    }

    /// Write a length-prefixed string (presence byte, ULEB128 length, UTF-8
    /// bytes).
    pub fn write_string(&mut self, value: &str) {
        self.write_u8(0x0b);
        self.write_uleb128(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    /// Write a hash as raw digest bytes.
    pub fn write_hash_digest(&mut self, hash: &ContentHash) {
        self.write_bytes(&hash.0);
    }

    /// Write a hash as a 32-character hex string (the older persisted form).
    pub fn write_hash_chars(&mut self, hash: &ContentHash) {
        self.write_string(&hash.to_hex());
    }

    /// Flush buffered bytes, consuming the writer.
    pub fn finish(mut self) -> Result<()> {
        self.state?;
        if let Some(mut inner) = self.inner.take() {
            inner.flush()?;
        }
        Ok(())
    }
}

fn read_uleb128_raw(reader: &mut impl Read) -> Result<(u64, u64)> {
    let mut buf = [0_u8];
    reader.read_exact(&mut buf)?;

    let mut byte_index = 0;
    let mut total = (buf[0] & 0b0111_1111) as u64;
    while (buf[0] & 0b1000_0000) == 0b1000_0000 {
        byte_index += 1;
        if byte_index > 9 {
            return Err(Error::UlebOverflow);
        }

        reader.read_exact(&mut buf)?;
        total += ((buf[0] & 0b0111_1111) as u64) << (7 * byte_index);
    }

    Ok((total, byte_index + 1))
}
