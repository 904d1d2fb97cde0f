use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use url::Url;

use crate::{manifest::MediaType, IoriResult};

/// Budget of [`MemoryCache::default`]: two video profiles, one audio profile, one iframe
/// profile and the main manifest.
pub const DEFAULT_CACHE_SIZE: usize = 3 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Main manifest.
    Manifest,
    Media(MediaType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub body: Bytes,
    pub effective_url: Url,
}

/// Cache of manifests, indexes and fragments keyed by URL.
pub trait FragmentCache: Send + Sync + 'static {
    fn lookup(&self, url: &Url) -> impl Future<Output = Option<CachedEntry>> + Send;

    fn store(
        &self,
        url: &Url,
        body: Bytes,
        effective_url: &Url,
        live: bool,
        kind: CacheKind,
    ) -> impl Future<Output = IoriResult<()>> + Send;

    fn clear(&self) -> impl Future<Output = IoriResult<()>> + Send;
}

impl<C> FragmentCache for Arc<C>
where
    C: FragmentCache,
{
    fn lookup(&self, url: &Url) -> impl Future<Output = Option<CachedEntry>> + Send {
        self.as_ref().lookup(url)
    }

    fn store(
        &self,
        url: &Url,
        body: Bytes,
        effective_url: &Url,
        live: bool,
        kind: CacheKind,
    ) -> impl Future<Output = IoriResult<()>> + Send {
        self.as_ref().store(url, body, effective_url, live, kind)
    }

    fn clear(&self) -> impl Future<Output = IoriResult<()>> + Send {
        self.as_ref().clear()
    }
}

#[derive(Debug)]
struct Slot {
    entry: CachedEntry,
    kind: CacheKind,
    /// Second key of an entry stored under both its URL and its effective URL.
    duplicate: bool,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<Url, Slot>,
    /// Insertion order, oldest first.
    order: VecDeque<Url>,
    stored: usize,
}

impl Inner {
    fn remove(&mut self, url: &Url) -> usize {
        self.order.retain(|u| u != url);
        match self.slots.remove(url) {
            Some(slot) if !slot.duplicate => slot.entry.body.len(),
            _ => 0,
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
        self.stored = 0;
    }

    /// Evict the oldest entries, same kind first, until `needed` bytes fit.
    fn make_room(&mut self, kind: CacheKind, needed: usize, budget: usize) -> bool {
        for same_kind_only in [true, false] {
            let candidates: Vec<Url> = self
                .order
                .iter()
                .filter(|url| {
                    self.slots.get(*url).is_some_and(|slot| {
                        slot.kind != CacheKind::Manifest && (!same_kind_only || slot.kind == kind)
                    })
                })
                .cloned()
                .collect();
            for url in candidates {
                if self.stored + needed <= budget {
                    return true;
                }
                let freed = self.remove(&url);
                self.stored -= freed;
            }
        }
        self.stored + needed <= budget
    }
}

/// In-memory [`FragmentCache`] with a total byte budget.
///
/// Live content other than the main manifest is never cached, and a new main manifest flushes
/// everything cached for the previous one.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<Inner>>,
    budget: Option<usize>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CACHE_SIZE))
    }
}

impl MemoryCache {
    /// `None` disables the budget.
    pub fn new(budget: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            budget,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stored_bytes(&self) -> usize {
        self.lock().stored
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }
}

impl FragmentCache for MemoryCache {
    async fn lookup(&self, url: &Url) -> Option<CachedEntry> {
        let entry = self.lock().slots.get(url).map(|slot| slot.entry.clone());
        tracing::trace!(%url, found = entry.is_some(), "cache lookup");
        entry
    }

    async fn store(
        &self,
        url: &Url,
        body: Bytes,
        effective_url: &Url,
        live: bool,
        kind: CacheKind,
    ) -> IoriResult<()> {
        if live && kind != CacheKind::Manifest {
            return Ok(());
        }

        let mut inner = self.lock();
        if inner.slots.contains_key(url) {
            log::warn!("File {} already exists, ignoring.", url);
            return Ok(());
        }
        if kind == CacheKind::Manifest && !inner.slots.is_empty() {
            tracing::debug!(entries = inner.slots.len(), "new manifest, flushing cache");
            inner.clear();
        }

        let len = body.len();
        if let Some(budget) = self.budget {
            if len >= budget {
                return Ok(());
            }
            if inner.stored + len > budget {
                tracing::warn!(
                    entries = inner.slots.len(),
                    stored = inner.stored,
                    needed = len,
                    "Reached max cache size"
                );
                if !inner.make_room(kind, len, budget) {
                    return Ok(());
                }
            }
        }

        let entry = CachedEntry {
            body,
            effective_url: effective_url.clone(),
        };
        if url != effective_url {
            inner.slots.insert(
                effective_url.clone(),
                Slot {
                    entry: entry.clone(),
                    kind,
                    duplicate: true,
                },
            );
            inner.order.push_back(effective_url.clone());
        }
        inner.slots.insert(
            url.clone(),
            Slot {
                entry,
                kind,
                duplicate: false,
            },
        );
        inner.order.push_back(url.clone());
        inner.stored += len;
        Ok(())
    }

    async fn clear(&self) -> IoriResult<()> {
        self.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://example.com/{path}")).unwrap()
    }

    const VIDEO: CacheKind = CacheKind::Media(MediaType::Video);
    const AUDIO: CacheKind = CacheKind::Media(MediaType::Audio);

    #[tokio::test]
    async fn test_store_and_lookup() -> IoriResult<()> {
        let cache = MemoryCache::default();
        cache
            .store(&url("a.mpd"), Bytes::from_static(b"mpd"), &url("b.mpd"), false, CacheKind::Manifest)
            .await?;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stored_bytes(), 3);
        let entry = cache.lookup(&url("a.mpd")).await.unwrap();
        assert_eq!(entry.effective_url, url("b.mpd"));
        assert!(cache.lookup(&url("b.mpd")).await.is_some());

        // live fragments are never cached
        cache
            .store(&url("1.m4s"), Bytes::from_static(b"x"), &url("1.m4s"), true, VIDEO)
            .await?;
        assert!(cache.lookup(&url("1.m4s")).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_new_manifest_flushes() -> IoriResult<()> {
        let cache = MemoryCache::default();
        let same = |p| (url(p), url(p));
        let (a, _) = same("a.mpd");
        cache.store(&a, Bytes::from_static(b"1"), &a, false, CacheKind::Manifest).await?;
        let (v, _) = same("v.m4s");
        cache.store(&v, Bytes::from_static(b"22"), &v, false, VIDEO).await?;
        let (b, _) = same("b.mpd");
        cache.store(&b, Bytes::from_static(b"3"), &b, true, CacheKind::Manifest).await?;

        assert!(cache.lookup(&v).await.is_none());
        assert!(cache.lookup(&a).await.is_none());
        assert!(cache.lookup(&b).await.is_some());
        assert_eq!(cache.stored_bytes(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_eviction_prefers_same_kind() -> IoriResult<()> {
        let cache = MemoryCache::new(Some(10));
        for (name, kind) in [("v1", VIDEO), ("a1", AUDIO), ("v2", VIDEO)] {
            let u = url(name);
            cache.store(&u, Bytes::from(vec![0u8; 3]), &u, false, kind).await?;
        }
        let v3 = url("v3");
        cache.store(&v3, Bytes::from(vec![0u8; 3]), &v3, false, VIDEO).await?;

        assert!(cache.lookup(&url("v1")).await.is_none());
        assert!(cache.lookup(&url("a1")).await.is_some());
        assert!(cache.lookup(&url("v2")).await.is_some());
        assert_eq!(cache.stored_bytes(), 9);

        // too large for the budget
        let big = url("big");
        cache.store(&big, Bytes::from(vec![0u8; 10]), &big, false, AUDIO).await?;
        assert!(cache.lookup(&big).await.is_none());
        Ok(())
    }
}
