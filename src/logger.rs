//! Buffered logging
//!
//! # Description
//! Log records are rendered into a fixed buffer from any context. The host link drains the buffer
//! from its own task, so logging never blocks the control tick on I/O.
use core::cell::RefCell;
use core::fmt::Write;

use critical_section::Mutex;
use heapless::String;

/// Size of the pending log data buffer.
const BUFFER_SIZE: usize = 1024;

/// Longest rendered log line.
const LINE_SIZE: usize = 128;

/// A logging buffer for storing serialized logs pending transmission.
///
/// # Note
/// Data that does not fit into the buffer is dropped until the buffer is processed.
pub struct BufferedLog {
    buffer: Mutex<RefCell<LogBuffer>>,
}

impl Default for BufferedLog {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedLog {
    /// Construct a new buffered log object.
    pub const fn new() -> Self {
        Self {
            buffer: Mutex::new(RefCell::new(LogBuffer::new())),
        }
    }

    /// Install the log as the global logger.
    ///
    /// # Args
    /// * `level` - The most verbose level to record.
    pub fn install(&'static self, level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(level);
        Ok(())
    }

    /// Process all of the available log data.
    ///
    /// # Args
    /// * `sink` - Consumes the pending log data. The buffer is cleared afterwards.
    pub fn process(&self, sink: impl FnOnce(&[u8])) {
        critical_section::with(|cs| {
            let mut buffer = self.buffer.borrow_ref_mut(cs);
            sink(buffer.data());
            buffer.clear();
        });
    }
}

impl log::Log for BufferedLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let source_file = record.file().unwrap_or("Unknown");
        let source_line = record.line().unwrap_or(u32::MAX);

        // Print the record into the buffer.
        let mut string: String<LINE_SIZE> = String::new();
        if writeln!(
            &mut string,
            "[{}] {}:{} - {}",
            record.level(),
            source_file,
            source_line,
            record.args()
        )
        .is_err()
        {
            // Truncated lines still end with a newline.
            string.pop();
            string.push('\n').ok();
        }

        critical_section::with(|cs| {
            self.buffer.borrow_ref_mut(cs).append(string.as_bytes());
        });
    }

    // The log is not capable of being flushed as it does not own the data consumer.
    fn flush(&self) {}
}

/// An internal buffer for storing serialized log data.
struct LogBuffer {
    data: [u8; BUFFER_SIZE],
    index: usize,
}

impl LogBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0u8; BUFFER_SIZE],
            index: 0,
        }
    }

    /// Append data into the buffer.
    ///
    /// # Args
    /// * `data` - The data to append. If space isn't available, as much data will be appended as
    ///   possible.
    pub fn append(&mut self, data: &[u8]) {
        let tail = &mut self.data[self.index..];
        let count = data.len().min(tail.len());
        tail[..count].copy_from_slice(&data[..count]);
        self.index += count;
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.index]
    }

    pub fn clear(&mut self) {
        self.index = 0;
    }
}
