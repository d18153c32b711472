use bytes::Bytes;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::codec::{Frame, FrameEncoder, ImageFormat};
use super::gate::PressGate;
use super::labels::ButtonLabels;

/// Advance a version id, wrapping around and skipping 0.
///
/// 0 is reserved for callers that want the current value unconditionally.
pub fn next_version(id: u32) -> u32 {
    match id.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

/// What a follower consumes from a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FollowerKind {
    Image(ImageFormat),
    /// Button-only follower (socket or polling button channel).
    Buttons,
}

#[derive(Default)]
struct FrameSlot {
    frame: Option<Arc<Frame>>,
    dirty: bool,
}

struct ImageCache {
    png: Option<Bytes>,
    jpeg: Option<Bytes>,
    version: u32,
}

impl ImageCache {
    fn slot(&self, format: ImageFormat) -> &Option<Bytes> {
        match format {
            ImageFormat::Png => &self.png,
            ImageFormat::Jpeg => &self.jpeg,
        }
    }

    fn slot_mut(&mut self, format: ImageFormat) -> &mut Option<Bytes> {
        match format {
            ImageFormat::Png => &mut self.png,
            ImageFormat::Jpeg => &mut self.jpeg,
        }
    }
}

struct LabelCache {
    json: String,
    version: u32,
}

#[derive(Default)]
struct Followers {
    png: AtomicUsize,
    jpeg: AtomicUsize,
    buttons: AtomicUsize,
}

impl Followers {
    fn counter(&self, kind: FollowerKind) -> &AtomicUsize {
        match kind {
            FollowerKind::Image(ImageFormat::Png) => &self.png,
            FollowerKind::Image(ImageFormat::Jpeg) => &self.jpeg,
            FollowerKind::Buttons => &self.buttons,
        }
    }
}

/// Result of [`PanelResource::get_encoded_if`].
pub enum ImagePoll<'a> {
    /// The caller already has the current version.
    NoChange,
    /// The format has no followers or nothing has been encoded yet.
    Unavailable,
    Ready(ImageLease<'a>),
}

impl std::fmt::Debug for ImagePoll<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChange => f.write_str("NoChange"),
            Self::Unavailable => f.write_str("Unavailable"),
            Self::Ready(lease) => f
                .debug_struct("Ready")
                .field("id", &lease.id())
                .field("len", &lease.bytes().len())
                .finish(),
        }
    }
}

/// Encoded image bytes borrowed from the cache.
///
/// Holds a read lock on the image cache, so the panel cannot re-encode until
/// the lease is dropped.
pub struct ImageLease<'a> {
    cache: RwLockReadGuard<'a, ImageCache>,
    format: ImageFormat,
}

impl ImageLease<'_> {
    pub fn id(&self) -> u32 {
        self.cache.version
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        self.cache.slot(self.format).as_deref().unwrap_or_default()
    }
}

/// Server-side state of one displayed instrument panel.
pub struct PanelResource {
    id: u64,
    key: String,
    encoder: Arc<dyn FrameEncoder>,
    frame: Mutex<FrameSlot>,
    images: RwLock<ImageCache>,
    labels: Mutex<LabelCache>,
    followers: Followers,
    gate: PressGate,
    closed: AtomicBool,
    /// Version bump owed to the image cache, applied by the next poll.
    bump_pending: AtomicBool,
    registered: AtomicBool,
}

impl std::fmt::Debug for PanelResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelResource")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("followers", &self.total_followers())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PanelResource {
    pub fn new(id: u64, key: impl Into<String>, encoder: Arc<dyn FrameEncoder>) -> Self {
        Self {
            id,
            key: key.into(),
            encoder,
            frame: Mutex::new(FrameSlot::default()),
            images: RwLock::new(ImageCache {
                png: None,
                jpeg: None,
                version: 1,
            }),
            labels: Mutex::new(LabelCache {
                json: ButtonLabels::default().to_json(),
                version: 1,
            }),
            followers: Followers::default(),
            gate: PressGate::new(),
            closed: AtomicBool::new(false),
            bump_pending: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        }
    }

    /// Process-unique id, distinct for every panel ever created.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    // ── Frames ─────────────────────────────────────────────────────

    /// Store a new raw frame. Encoding happens lazily on the next poll.
    pub fn set_frame(&self, frame: Frame) {
        let mut slot = self.frame.lock();
        slot.frame = Some(Arc::new(frame));
        slot.dirty = true;
    }

    pub fn has_frame(&self) -> bool {
        self.frame.lock().frame.is_some()
    }

    /// Re-encode the current frame on the next poll, if there is one.
    pub(crate) fn mark_dirty(&self) {
        let mut slot = self.frame.lock();
        if slot.frame.is_some() {
            slot.dirty = true;
        }
    }

    /// Poll the image cache for `format`.
    ///
    /// Re-encodes first when a new frame is pending. Returns
    /// [`ImagePoll::NoChange`] iff `previous` equals the current version.
    pub fn get_encoded_if(&self, format: ImageFormat, previous: u32) -> ImagePoll<'_> {
        let mut cache = self.images.write();
        self.refresh_cache(&mut cache);

        if cache.version == previous {
            return ImagePoll::NoChange;
        }
        if self.follower_count(FollowerKind::Image(format)) == 0 || cache.slot(format).is_none() {
            return ImagePoll::Unavailable;
        }
        ImagePoll::Ready(ImageLease {
            cache: RwLockWriteGuard::downgrade(cache),
            format,
        })
    }

    fn refresh_cache(&self, cache: &mut ImageCache) {
        let bumped = self.bump_pending.swap(false, Ordering::AcqRel);
        let frame = {
            let mut slot = self.frame.lock();
            if slot.dirty {
                slot.dirty = false;
                slot.frame.clone()
            } else {
                None
            }
        };
        let Some(frame) = frame else {
            if bumped {
                cache.version = next_version(cache.version);
            }
            return;
        };

        for format in ImageFormat::ALL {
            let encoded = if self.follower_count(FollowerKind::Image(format)) > 0 {
                match self.encoder.encode(&frame, format) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::warn!(key = %self.key, ?format, ?e, "failed to encode frame");
                        None
                    }
                }
            } else {
                None
            };
            *cache.slot_mut(format) = encoded;
        }
        cache.version = next_version(cache.version);
    }

    /// Current image version id, counting a bump not yet applied.
    pub fn image_version(&self) -> u32 {
        let version = self.images.read().version;
        if self.bump_pending.load(Ordering::Acquire) {
            next_version(version)
        } else {
            version
        }
    }

    // ── Labels ─────────────────────────────────────────────────────

    /// Replace the label snapshot and advance the button version.
    pub fn set_labels(&self, labels: &ButtonLabels) {
        let json = labels.to_json();
        let mut cache = self.labels.lock();
        cache.json = json;
        cache.version = next_version(cache.version);
    }

    /// Latest label snapshot as JSON.
    pub fn labels_json(&self) -> String {
        self.labels.lock().json.clone()
    }

    /// Label snapshot and its version, only if the version differs from
    /// `previous`.
    pub fn labels_if(&self, previous: u32) -> Option<(String, u32)> {
        let cache = self.labels.lock();
        if cache.version == previous {
            return None;
        }
        Some((cache.json.clone(), cache.version))
    }

    pub fn labels_version(&self) -> u32 {
        self.labels.lock().version
    }

    // ── Followers ──────────────────────────────────────────────────
    //
    // Counters are only mutated while the registry lock is held.

    pub(crate) fn add_follower(&self, kind: FollowerKind) -> usize {
        self.followers.counter(kind).fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the counter for `kind` (never below zero) and return the
    /// remaining total across all kinds.
    pub(crate) fn remove_follower(&self, kind: FollowerKind) -> usize {
        let counter = self.followers.counter(kind);
        let current = counter.load(Ordering::Acquire);
        if current > 0 {
            counter.store(current - 1, Ordering::Release);
        }
        self.total_followers()
    }

    pub fn follower_count(&self, kind: FollowerKind) -> usize {
        self.followers.counter(kind).load(Ordering::Acquire)
    }

    pub fn total_followers(&self) -> usize {
        self.follower_count(FollowerKind::Image(ImageFormat::Png))
            + self.follower_count(FollowerKind::Image(ImageFormat::Jpeg))
            + self.follower_count(FollowerKind::Buttons)
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flag the panel as powered off and owe the image cache a version bump,
    /// so every image follower wakes up and observes it.
    ///
    /// Never touches the image cache lock: a follower may hold a lease on it
    /// while writing to a slow client.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.bump_pending.store(true, Ordering::Release);
    }

    /// Whether the host has accepted this panel.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::Release);
    }

    pub(crate) fn gate(&self) -> &PressGate {
        &self.gate
    }
}
