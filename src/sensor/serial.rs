use crate::error::AppError;
use crate::sensor::OccupancySource;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_CHUNK_BYTES: usize = 256;

/// Serial device (or any byte stream) opened as a file.
///
/// The port is not configured here. Set the device to 9600 baud, raw mode
/// before starting the service, e.g. `stty -F /dev/ttyUSB0 9600 raw`.
pub struct SerialSource<R = File> {
    reader: R,
    /// Tail of a UTF-8 sequence split across reads.
    pending: Vec<u8>,
}

impl SerialSource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let reader = File::open(path.as_ref())?;
        Ok(Self::from_reader(reader))
    }
}

impl<R: Read> SerialSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    /// Decode everything complete in `pending`, keeping an incomplete
    /// trailing sequence for the next read.
    fn decode_pending(&mut self) -> String {
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(err) if err.error_len().is_none() => {
                let tail = self.pending.split_off(err.valid_up_to());
                let head = std::mem::replace(&mut self.pending, tail);
                String::from_utf8_lossy(&head).into_owned()
            }
            Err(_) => {
                let bytes = std::mem::take(&mut self.pending);
                String::from_utf8_lossy(&bytes).into_owned()
            }
        }
    }
}

impl<R: Read> OccupancySource for SerialSource<R> {
    fn read_chunk(&mut self) -> Result<Option<String>, AppError> {
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) if self.pending.is_empty() => return Ok(None),
                Ok(0) => {
                    let rest = std::mem::take(&mut self.pending);
                    return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
                }
                Ok(read) => {
                    self.pending.extend_from_slice(&buf[..read]);
                    let text = self.decode_pending();
                    if text.is_empty() {
                        continue;
                    }
                    return Ok(Some(text));
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}
