//! Events appended to a file, each as a big-endian `u32` length followed by the encoded
//! event.

use super::{Sink, SinkError};
use crate::event::Event;
use crate::identity::Identity;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "Opened event file");
        Ok(FileSink { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn send(&mut self, _identity: &Identity, event: &Event) -> Result<(), SinkError> {
        let msg_buf = event.encode()?;
        let msg_len =
            u32::try_from(msg_buf.len()).map_err(|_| SinkError::FrameTooLarge(msg_buf.len()))?;

        let mut frame = Vec::with_capacity(4 + msg_buf.len());
        frame.extend_from_slice(&msg_len.to_be_bytes());
        frame.extend_from_slice(&msg_buf);
        self.file.write_all(&frame)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Decode every event in a file written by [`FileSink`].
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<Event>, SinkError> {
    let buf = std::fs::read(path)?;
    let mut events = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let header = buf
            .get(offset..offset + 4)
            .ok_or(SinkError::Truncated { offset })?;
        let msg_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let body = buf
            .get(offset + 4..offset + 4 + msg_len)
            .ok_or(SinkError::Truncated { offset })?;
        events.push(Event::decode(body)?);
        offset += 4 + msg_len;
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::sink::report;

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");

        let mut ctx = Context::new();
        let mut written = Vec::new();
        {
            let mut sink = FileSink::open(&path).unwrap();
            let mut entry = ctx.start_trace();
            entry.add_info("Layer", "http").unwrap();
            entry.add_info("Label", "entry").unwrap();
            written.push(entry.clone());
            report(&mut sink, &mut ctx, entry).unwrap();
        }
        {
            // reopening appends
            let mut sink = FileSink::open(&path).unwrap();
            let mut exit = ctx.create_event().unwrap();
            exit.add_info("Label", "exit").unwrap();
            exit.add_info("Payload", b"\x00\x01".as_slice()).unwrap();
            written.push(exit.clone());
            report(&mut sink, &mut ctx, exit).unwrap();
        }

        let read = read_events(&path).unwrap();
        assert_eq!(read, written);
        assert!(read[1].edges()[0].targets(read[0].identity()));
    }

    #[test]
    fn truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");
        {
            let mut sink = FileSink::open(&path).unwrap();
            let event = Event::root();
            sink.send(event.identity(), &event).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.pop();
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_events(&path),
            Err(SinkError::Truncated { offset: 0 })
        ));

        std::fs::write(&path, [0u8, 0]).unwrap();
        assert!(matches!(
            read_events(&path),
            Err(SinkError::Truncated { offset: 0 })
        ));
    }

    #[test]
    fn empty_file_has_no_events() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(read_events(file.path()).unwrap().is_empty());
    }
}
