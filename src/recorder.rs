//! Durable capture of raw framed messages.
//!
//! The recorder is not part of the reception path: it is wired in by
//! subscribing its `write` to the driver's generic message registry. The
//! file format is a flat concatenation of raw frames, headers preserved, so
//! a recording can be replayed through the same frame reader that handles
//! the live stream.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::driver::SonarDriver;
use crate::error::{Error, Result};
use crate::event::CallbackId;
use crate::protocol::RawMessage;

struct Sink {
    writer: BufWriter<File>,
    path: PathBuf,
    frames: u64,
}

/// Append-only sink writing raw frames verbatim.
#[derive(Default)]
pub struct FileRecorder {
    sink: Mutex<Option<Sink>>,
}

impl FileRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a recording file. Refuses to clobber an existing file unless
    /// `overwrite` is set. An already-open recording is closed first.
    pub fn open<P: AsRef<Path>>(&self, path: P, overwrite: bool) -> Result<()> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .create_new(!overwrite)
            .truncate(overwrite)
            .open(&path)
            .map_err(Error::Io)?;

        info!(path = %path.display(), "recording opened");

        *self.sink.lock() = Some(Sink {
            writer: BufWriter::new(file),
            path,
            frames: 0,
        });

        Ok(())
    }

    /// Flush and close the current recording, if any.
    pub fn close(&self) {
        if let Some(mut sink) = self.sink.lock().take() {
            if let Err(err) = sink.writer.flush() {
                warn!(%err, "flush failed while closing recording");
            }
            info!(
                path = %sink.path.display(),
                frames = sink.frames,
                "recording closed"
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.sink.lock().as_ref().map_or(0, |s| s.frames)
    }

    /// Append one frame, header and payload verbatim. A no-op when no
    /// recording is open.
    pub fn write(&self, message: &RawMessage) -> Result<()> {
        let mut guard = self.sink.lock();
        let Some(sink) = guard.as_mut() else {
            return Ok(());
        };

        sink.writer.write_all(message.data()).map_err(Error::Io)?;
        sink.frames += 1;
        Ok(())
    }

    /// Subscribe a recorder to a driver's generic message registry.
    /// Dropping the returned id is fine; use it with
    /// `driver.message_callbacks().remove(..)` to detach.
    pub fn attach(recorder: &std::sync::Arc<Self>, driver: &SonarDriver) -> CallbackId {
        let recorder = std::sync::Arc::clone(recorder);
        driver.message_callbacks().append(move |message| {
            if let Err(err) = recorder.write(message) {
                warn!(%err, "recorder write failed");
            }
        })
    }
}

impl Drop for FileRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageHeader, MessageId, HEADER_SIZE};

    fn frame(payload: &[u8]) -> RawMessage {
        let header = MessageHeader {
            message_id: MessageId::SimplePingResult,
            payload_size: payload.len() as u32,
            ..Default::default()
        };
        let mut bytes = vec![0u8; HEADER_SIZE];
        header.encode(&mut bytes).unwrap();
        bytes.extend_from_slice(payload);
        RawMessage::new(header, bytes)
    }

    #[test]
    fn test_write_concatenates_frames_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.raw");

        let recorder = FileRecorder::new();
        recorder.open(&path, false).unwrap();
        assert!(recorder.is_open());

        let first = frame(&[1, 2, 3]);
        let second = frame(&[4, 5]);
        recorder.write(&first).unwrap();
        recorder.write(&second).unwrap();
        assert_eq!(recorder.frames_written(), 2);
        recorder.close();
        assert!(!recorder.is_open());

        let bytes = std::fs::read(&path).unwrap();
        let mut expected = first.data().to_vec();
        expected.extend_from_slice(second.data());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_open_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.raw");
        std::fs::write(&path, b"precious").unwrap();

        let recorder = FileRecorder::new();
        assert!(recorder.open(&path, false).is_err());
        assert!(!recorder.is_open());

        recorder.open(&path, true).unwrap();
        assert!(recorder.is_open());
    }

    #[test]
    fn test_write_without_open_is_noop() {
        let recorder = FileRecorder::new();
        assert!(recorder.write(&frame(&[9])).is_ok());
        assert_eq!(recorder.frames_written(), 0);
    }
}
