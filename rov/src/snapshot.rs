//! SAVE_IMAGE side action.
//!
//! Writes the newest frame of every relay to a binary PPM file. Frames are
//! read with [`FrameRelay::peek_newest`](crate::relay::FrameRelay::peek_newest)
//! so the running task and the viewers are left undisturbed, and no camera
//! is ever opened here.

use crate::relay::{Frame, RelaySet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to write snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Saves relay contents to disk.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    relays: RelaySet,
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(relays: RelaySet, dir: impl Into<PathBuf>) -> Self {
        Self {
            relays,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one file per channel holding a frame. Returns the written paths.
    pub fn write_now(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();

        let mut written = Vec::new();
        for (channel, relay) in self.relays.iter() {
            let Some(frame) = relay.peek_newest() else {
                debug!(%channel, "no frame to save");
                continue;
            };
            if !frame.is_well_formed() {
                warn!(%channel, "skipping malformed frame");
                continue;
            }
            let path = self
                .dir
                .join(format!("img_{}_{stamp}.ppm", channel.name()));
            write_ppm(&path, &frame).map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        Ok(written)
    }

    /// Fire-and-forget [`write_now`](Self::write_now) on a detached thread.
    pub fn spawn(&self) {
        let writer = self.clone();
        let spawned = std::thread::Builder::new()
            .name("snapshot".to_string())
            .spawn(move || match writer.write_now() {
                Ok(paths) if paths.is_empty() => info!("SAVE_IMAGE: no frames to save"),
                Ok(paths) => info!(files = paths.len(), dir = %writer.dir.display(), "Images saved"),
                Err(e) => warn!(error = %e, "SAVE_IMAGE failed"),
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to start snapshot writer");
        }
    }
}

fn write_ppm(path: &Path, frame: &Frame) -> io::Result<()> {
    let mut file = io::BufWriter::new(fs::File::create(path)?);
    write!(file, "P6\n{} {}\n255\n", frame.width, frame.height)?;
    file.write_all(&frame.pixels)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rov_common::mode::StreamChannel;
    use tempfile::TempDir;

    #[test]
    fn writes_newest_frame_per_channel() {
        let relays = RelaySet::with_capacities([4; 4]);
        relays.push(Frame::new(StreamChannel::Down, 1, 1, 1, vec![1, 1, 1]));
        relays.push(Frame::new(StreamChannel::Down, 2, 2, 1, vec![1, 2, 3, 4, 5, 6]));
        relays.push(Frame::new(StreamChannel::Manipulator, 1, 1, 1, vec![7, 8, 9]));

        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(relays.clone(), dir.path().join("shots"));
        let mut paths = writer.write_now().unwrap();
        paths.sort();

        assert_eq!(paths.len(), 2);
        let down = paths
            .iter()
            .find(|p| p.to_string_lossy().contains("img_down_"))
            .unwrap();
        let bytes = fs::read(down).unwrap();
        assert_eq!(bytes, b"P6\n2 1\n255\n\x01\x02\x03\x04\x05\x06");

        // Relays are not consumed.
        assert_eq!(relays.get(StreamChannel::Down).len(), 2);
    }

    #[test]
    fn empty_relays_write_nothing() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(RelaySet::with_capacities([1; 4]), dir.path());
        assert!(writer.write_now().unwrap().is_empty());
    }

    #[test]
    fn unwritable_dir_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let relays = RelaySet::with_capacities([1; 4]);
        relays.push(Frame::new(StreamChannel::Down, 1, 1, 1, vec![0, 0, 0]));

        let writer = SnapshotWriter::new(relays, blocker.join("sub"));
        assert!(matches!(writer.write_now(), Err(SnapshotError::Io { .. })));
    }
}
