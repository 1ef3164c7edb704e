/// Screenshot sources.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::debug;

/// Hands out a screenshot file for the current frame. `None` is normal:
/// generation simply goes ahead without an image.
pub trait ScreenshotSource: Send + Sync {
    fn capture(&self) -> Option<PathBuf>;
}

/// Uses the newest image an external capture tool left in a directory.
#[derive(Debug, Clone)]
pub struct LatestFileCapture {
    dir: PathBuf,
    extension: String,
    max_age: Option<Duration>,
}

impl LatestFileCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "png".to_string(),
            max_age: None,
        }
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Ignore files older than `max_age`.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn newest(&self) -> std::io::Result<Option<PathBuf>> {
        let now = SystemTime::now();
        let mut best: Option<(SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension));
            if !matches {
                continue;
            }
            let modified = fs::metadata(&path)?.modified()?;
            if let Some(max_age) = self.max_age {
                let age = now.duration_since(modified).unwrap_or_default();
                if age > max_age {
                    continue;
                }
            }
            if best.as_ref().map_or(true, |(seen, _)| modified > *seen) {
                best = Some((modified, path));
            }
        }
        Ok(best.map(|(_, path)| path))
    }
}

impl ScreenshotSource for LatestFileCapture {
    fn capture(&self) -> Option<PathBuf> {
        match self.newest() {
            Ok(found) => found,
            Err(err) => {
                debug!(dir = %self.dir.display(), %err, "screenshot lookup failed");
                None
            }
        }
    }
}
