use std::{
    collections::VecDeque,
    io::{self, Read as _, Write as _},
};

use crate::exception_private::{ExcType, RunResult};

/// Byte-stream I/O collaborator.
///
/// Bytes pass through untranslated in both directions: the interactive link
/// is a binary protocol, so no newline remapping may happen here.
pub trait PlatformIo {
    /// Blocks for the next input byte; IoError when the stream has ended or failed.
    fn get_byte(&mut self) -> RunResult<u8>;

    /// Emits one byte.
    fn put_byte(&mut self, byte: u8) -> RunResult<()>;

    /// Emits a run of bytes.
    fn put_bytes(&mut self, bytes: &[u8]) -> RunResult<()> {
        for &b in bytes {
            self.put_byte(b)?;
        }
        Ok(())
    }

    /// Pushes buffered output to the device.
    fn flush(&mut self) -> RunResult<()> {
        Ok(())
    }
}

/// Process stdin/stdout.
///
/// Output is buffered and flushed on newline, on [`PlatformIo::flush`] and on drop.
#[derive(Debug, Default)]
pub struct StdIo {
    buffer: Vec<u8>,
}

impl StdIo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn io_error(err: &io::Error) -> crate::exception_private::RunError {
    ExcType::IoError.msg(err)
}

impl PlatformIo for StdIo {
    fn get_byte(&mut self) -> RunResult<u8> {
        self.flush()?;
        let mut buf = [0u8; 1];
        match io::stdin().read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(ExcType::IoError.msg("end of input")),
            Err(err) => Err(io_error(&err)),
        }
    }

    fn put_byte(&mut self, byte: u8) -> RunResult<()> {
        self.buffer.push(byte);
        if byte == b'\n' {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> RunResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut stdout = io::stdout().lock();
        stdout.write_all(&self.buffer).map_err(|e| io_error(&e))?;
        stdout.flush().map_err(|e| io_error(&e))?;
        self.buffer.clear();
        Ok(())
    }
}

impl Drop for StdIo {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Scripted input and captured output, for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectIo {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl CollectIo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collector whose `get_byte` yields `input`, then fails.
    #[must_use]
    pub fn with_input(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into().into(),
            output: Vec::new(),
        }
    }

    #[must_use]
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Output decoded as UTF-8, lossy.
    #[must_use]
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    #[must_use]
    pub fn into_output(self) -> Vec<u8> {
        self.output
    }
}

impl PlatformIo for CollectIo {
    fn get_byte(&mut self) -> RunResult<u8> {
        self.input.pop_front().ok_or_else(|| ExcType::IoError.msg("end of input"))
    }

    fn put_byte(&mut self, byte: u8) -> RunResult<()> {
        self.output.push(byte);
        Ok(())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> RunResult<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }
}

/// Discards output; input is always exhausted.
#[derive(Debug, Default)]
pub struct NoIo;

impl PlatformIo for NoIo {
    fn get_byte(&mut self) -> RunResult<u8> {
        Err(ExcType::IoError.msg("no input"))
    }

    fn put_byte(&mut self, _byte: u8) -> RunResult<()> {
        Ok(())
    }
}
