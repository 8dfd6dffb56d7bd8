//! Interfaces the engine consumes from its host, plus simple implementations
//! used by the command line runner.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::StageSnapshot;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("unable to decode image: {0}")]
    Decode(String),
    #[error("render failed: {0}")]
    Render(String),
}

/// Reads script assets. Case-insensitive resolution, if any, is the loader's job.
pub trait AssetLoader: Send + Sync {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError>;
    fn exists(&self, path: &str) -> bool;
    fn list_files(&self, pattern: &str) -> Result<Vec<String>, HostError>;
}

pub trait ImageDecoder: Send + Sync {
    /// Width and height of an encoded image.
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), HostError>;
}

/// Draws stage snapshots. Write-only from the engine's side.
pub trait Renderer {
    type Target;

    fn render_frame(&mut self, target: &mut Self::Target, snapshot: &StageSnapshot) -> Result<(), HostError>;
    fn clear(&mut self, color: u32) -> Result<(), HostError>;
}

/// Audio playback position, polled by the MIDI pump.
pub trait PlaybackClock: Send {
    /// Time since playback started, `None` before it starts.
    fn elapsed(&self) -> Option<Duration>;
    fn is_finished(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioKind {
    Midi,
    Wave,
}

/// Playback requested by a script, drained by the host's audio layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRequest {
    pub kind: AudioKind,
    pub path: String,
}

/// Loads assets from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DirectoryLoader {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.replace('\\', "/"))
    }
}

impl AssetLoader for DirectoryLoader {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(HostError::NotFound(path.to_owned()));
        }
        Ok(std::fs::read(full)?)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn list_files(&self, pattern: &str) -> Result<Vec<String>, HostError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if wildcard_match(pattern, &name) {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Case-insensitive `*` / `?` matching.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();
    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Reads dimensions out of a BMP header.
#[derive(Debug, Clone, Copy, Default)]
pub struct BmpHeaderDecoder;

impl ImageDecoder for BmpHeaderDecoder {
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), HostError> {
        if bytes.len() < 26 || &bytes[0..2] != b"BM" {
            return Err(HostError::Decode("not a BMP file".to_string()));
        }
        let read = |at: usize| i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        // Negative height marks a top-down bitmap.
        Ok((read(18).unsigned_abs(), read(22).unsigned_abs()))
    }
}

/// Playback clock backed by the system clock, for hosts without an audio device.
#[derive(Debug, Clone)]
pub struct SystemPlaybackClock {
    started: Instant,
    length: Option<Duration>,
}

impl SystemPlaybackClock {
    pub fn start(length: Option<Duration>) -> Self {
        SystemPlaybackClock {
            started: Instant::now(),
            length,
        }
    }
}

impl PlaybackClock for SystemPlaybackClock {
    fn elapsed(&self) -> Option<Duration> {
        Some(self.started.elapsed())
    }

    fn is_finished(&self) -> bool {
        self.length
            .map(|length| self.started.elapsed() >= length)
            .unwrap_or(false)
    }
}

/// Renderer that only counts what it is asked to draw.
#[derive(Debug, Clone, Default)]
pub struct CountingRenderer {
    pub frames: u64,
    pub draw_ops: usize,
    pub clears: u64,
}

impl Renderer for CountingRenderer {
    type Target = ();

    fn render_frame(&mut self, _target: &mut (), snapshot: &StageSnapshot) -> Result<(), HostError> {
        self.frames += 1;
        self.draw_ops += snapshot.draw_ops.len();
        Ok(())
    }

    fn clear(&mut self, _color: u32) -> Result<(), HostError> {
        self.clears += 1;
        Ok(())
    }
}
