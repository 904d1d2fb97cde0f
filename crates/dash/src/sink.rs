use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{manifest::MediaType, IoriResult};

/// Downstream consumer of fetched fragments.
///
/// Fragments of one track arrive in presentation order, or reverse presentation order during
/// rewind. Init fragments are pushed with a zero duration at the position of the fragment that
/// follows them.
pub trait MediaSink: Send + Sync + 'static {
    fn push(
        &self,
        media_type: MediaType,
        body: Bytes,
        position: f64,
        duration: f64,
    ) -> impl Future<Output = IoriResult<()>> + Send;

    /// The next fragment of `media_type` does not continue the previous one.
    fn signal_discontinuity(&self, media_type: MediaType) -> impl Future<Output = ()> + Send;

    /// Whether another fragment of `media_type` can be accepted now.
    fn buffer_available(&self, media_type: MediaType) -> bool;
}

impl<S> MediaSink for Arc<S>
where
    S: MediaSink,
{
    fn push(
        &self,
        media_type: MediaType,
        body: Bytes,
        position: f64,
        duration: f64,
    ) -> impl Future<Output = IoriResult<()>> + Send {
        self.as_ref().push(media_type, body, position, duration)
    }

    fn signal_discontinuity(&self, media_type: MediaType) -> impl Future<Output = ()> + Send {
        self.as_ref().signal_discontinuity(media_type)
    }

    fn buffer_available(&self, media_type: MediaType) -> bool {
        self.as_ref().buffer_available(media_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushedFragment {
    pub media_type: MediaType,
    pub body: Bytes,
    pub position: f64,
    pub duration: f64,
}

#[derive(Debug, Default)]
struct MemorySinkInner {
    fragments: Vec<PushedFragment>,
    discontinuities: Vec<MediaType>,
    buffered: HashMap<MediaType, usize>,
}

/// Keeps every pushed fragment in memory.
///
/// With a capacity set, a track stops accepting fragments once that many are buffered and
/// resumes when the embedder calls [`MemorySink::consume`].
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkInner>>,
    capacity: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Default::default(),
            capacity: Some(capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemorySinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fragments(&self) -> Vec<PushedFragment> {
        self.lock().fragments.clone()
    }

    pub fn fragments_of(&self, media_type: MediaType) -> Vec<PushedFragment> {
        self.lock()
            .fragments
            .iter()
            .filter(|f| f.media_type == media_type)
            .cloned()
            .collect()
    }

    pub fn discontinuities(&self) -> Vec<MediaType> {
        self.lock().discontinuities.clone()
    }

    /// Mark `count` buffered fragments of `media_type` as played.
    pub fn consume(&self, media_type: MediaType, count: usize) {
        let mut inner = self.lock();
        let buffered = inner.buffered.entry(media_type).or_default();
        *buffered = buffered.saturating_sub(count);
    }
}

impl MediaSink for MemorySink {
    async fn push(
        &self,
        media_type: MediaType,
        body: Bytes,
        position: f64,
        duration: f64,
    ) -> IoriResult<()> {
        let mut inner = self.lock();
        inner.fragments.push(PushedFragment {
            media_type,
            body,
            position,
            duration,
        });
        *inner.buffered.entry(media_type).or_default() += 1;
        Ok(())
    }

    async fn signal_discontinuity(&self, media_type: MediaType) {
        self.lock().discontinuities.push(media_type);
    }

    fn buffer_available(&self, media_type: MediaType) -> bool {
        let Some(capacity) = self.capacity else {
            return true;
        };
        self.lock()
            .buffered
            .get(&media_type)
            .is_none_or(|buffered| *buffered < capacity)
    }
}

struct TrackFile {
    file: File,
    sequence: u32,
}

/// Appends each track to its own file under a directory.
///
/// A discontinuity closes the current file; the next fragment starts `{stem}.{track}.{n}.mp4`.
pub struct FileSink {
    dir: PathBuf,
    stem: String,
    files: tokio::sync::Mutex<HashMap<MediaType, Option<TrackFile>>>,
    sequences: Mutex<HashMap<MediaType, u32>>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            files: Default::default(),
            sequences: Default::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the `sequence`-th continuous run of `media_type`.
    pub fn track_path(&self, media_type: MediaType, sequence: u32) -> PathBuf {
        let name = if sequence == 0 {
            format!("{}.{media_type}.mp4", self.stem)
        } else {
            format!("{}.{media_type}.{sequence}.mp4", self.stem)
        };
        self.dir.join(name)
    }

    fn sequences(&self) -> MutexGuard<'_, HashMap<MediaType, u32>> {
        self.sequences.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MediaSink for FileSink {
    async fn push(
        &self,
        media_type: MediaType,
        body: Bytes,
        position: f64,
        duration: f64,
    ) -> IoriResult<()> {
        let mut files = self.files.lock().await;
        let slot = files.entry(media_type).or_default();
        if slot.is_none() {
            let sequence = *self.sequences().entry(media_type).or_default();
            let path = self.track_path(media_type, sequence);
            tokio::fs::create_dir_all(&self.dir).await?;
            tracing::debug!(%media_type, path = %path.display(), "opening track file");
            *slot = Some(TrackFile {
                file: File::create(path).await?,
                sequence,
            });
        }

        if let Some(track) = slot {
            track.file.write_all(&body).await?;
            tracing::trace!(%media_type, position, duration, sequence = track.sequence, "fragment written");
        }
        Ok(())
    }

    async fn signal_discontinuity(&self, media_type: MediaType) {
        let mut files = self.files.lock().await;
        if let Some(Some(mut track)) = files.remove(&media_type) {
            if let Err(error) = track.file.flush().await {
                tracing::warn!(%media_type, %error, "failed to flush track file");
            }
            *self.sequences().entry(media_type).or_default() = track.sequence + 1;
        }
    }

    fn buffer_available(&self, _media_type: MediaType) -> bool {
        true
    }
}
