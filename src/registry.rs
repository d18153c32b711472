use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bridge::{HostBridgeQueues, PendingPress};
use crate::host::{ButtonAction, PanelHost};
use crate::panel::{FollowerKind, FrameEncoder, PanelResource};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PressError {
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("press was abandoned before the host executed it")]
    Abandoned,
}

struct RegistryInner {
    panels: HashMap<String, Arc<PanelResource>>,
    queues: HostBridgeQueues,
    shut_down: bool,
}

/// Maps panel keys to their [`PanelResource`] and stages host work.
///
/// The panel map and the bridge queues share one lock, so follower
/// bookkeeping and the resulting register/unregister work are atomic with
/// respect to each other.
#[derive(Clone)]
pub struct ResourceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    encoder: Arc<dyn FrameEncoder>,
    next_id: Arc<AtomicU64>,
}

impl ResourceRegistry {
    pub fn new(encoder: Arc<dyn FrameEncoder>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                panels: HashMap::new(),
                queues: HostBridgeQueues::new(),
                shut_down: false,
            })),
            encoder,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open `key` for a follower of `kind`, creating the panel if needed.
    pub fn open(&self, key: &str, kind: FollowerKind) -> Arc<PanelResource> {
        let mut inner = self.inner.lock();
        let panel = match inner.panels.get(key).cloned() {
            Some(panel) => panel,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let panel = Arc::new(PanelResource::new(id, key, Arc::clone(&self.encoder)));
                inner.panels.insert(key.to_string(), Arc::clone(&panel));
                inner.queues.push_register(Arc::clone(&panel));
                tracing::debug!(key, id, "panel created");
                panel
            }
        };
        add_follower(&panel, kind);
        panel
    }

    /// Open `key` only if the panel already exists.
    pub fn open_existing(&self, key: &str, kind: FollowerKind) -> Option<Arc<PanelResource>> {
        let inner = self.inner.lock();
        let panel = Arc::clone(inner.panels.get(key)?);
        add_follower(&panel, kind);
        Some(panel)
    }

    /// Like [`open`](Self::open), returning a guard that closes on drop.
    pub fn follow(&self, key: &str, kind: FollowerKind) -> FollowerGuard {
        FollowerGuard {
            panel: self.open(key, kind),
            registry: self.clone(),
            kind,
        }
    }

    pub fn follow_existing(&self, key: &str, kind: FollowerKind) -> Option<FollowerGuard> {
        Some(FollowerGuard {
            panel: self.open_existing(key, kind)?,
            registry: self.clone(),
            kind,
        })
    }

    /// Release one follower of `kind` on `key`. The panel is removed and
    /// queued for unregistration once its last follower is gone.
    pub fn close(&self, key: &str, kind: FollowerKind) {
        let mut inner = self.inner.lock();
        if let Some(panel) = inner.panels.get(key).cloned() {
            release_locked(&mut inner, &panel, kind);
        }
    }

    fn release(&self, panel: &Arc<PanelResource>, kind: FollowerKind) {
        let mut inner = self.inner.lock();
        let current = inner
            .panels
            .get(panel.key())
            .is_some_and(|p| Arc::ptr_eq(p, panel));
        if current {
            release_locked(&mut inner, panel, kind);
        } else {
            // Already dropped from the map by teardown.
            panel.remove_follower(kind);
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<PanelResource>> {
        self.inner.lock().panels.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().panels.is_empty()
    }

    /// Ask the host to render `panel` on its next tick.
    pub fn request_refresh(&self, panel: &Arc<PanelResource>) {
        self.inner.lock().queues.push_refresh(Arc::clone(panel));
    }

    /// Press `button` on `panel` and block until the host has executed it.
    ///
    /// Presses on one panel are serialized by its press gate; the gate is
    /// released by the host tick once the press completes.
    pub fn press(&self, panel: &Arc<PanelResource>, button: i32) -> Result<(), PressError> {
        panel.gate().take();
        let done = {
            let mut inner = self.inner.lock();
            if inner.shut_down {
                panel.gate().give();
                return Err(PressError::ShuttingDown);
            }
            let (press, done) = PendingPress::new(Arc::clone(panel), button);
            inner.queues.push_press(press);
            done
        };
        tracing::debug!(key = %panel.key(), button, "press queued");
        done.blocking_recv().map_err(|_| PressError::Abandoned)
    }

    /// Drain the bridge queues on the host thread.
    ///
    /// Never blocks: if the registry lock is contended the tick is skipped
    /// and `false` is returned. Work is processed in a fixed order: forced
    /// refreshes, registrations, unregistrations, completion of presses
    /// executed on the previous tick, then newly queued presses.
    pub fn tick<H: PanelHost + ?Sized>(&self, host: &mut H) -> bool {
        let Some(mut guard) = self.inner.try_lock() else {
            tracing::trace!("registry busy, skipping host tick");
            return false;
        };
        if guard.shut_down {
            return false;
        }
        let queues = &mut guard.queues;

        for panel in queues.drain_refresh() {
            if panel.is_registered() {
                host.refresh(&panel);
            }
        }

        for panel in queues.drain_register() {
            if host.register(&panel) {
                panel.set_registered(true);
                panel.set_labels(&host.labels(&panel));
                queues.push_refresh(Arc::clone(&panel));
                tracing::info!(key = %panel.key(), id = panel.id(), "panel registered");
            } else {
                tracing::warn!(key = %panel.key(), "host rejected panel");
            }
        }

        for panel in queues.drain_unregister() {
            if panel.is_registered() {
                host.unregister(&panel);
                panel.set_registered(false);
                tracing::info!(key = %panel.key(), id = panel.id(), "panel unregistered");
            }
        }

        for press in queues.drain_ended() {
            press.complete();
        }

        for press in queues.drain_presses() {
            execute_press(host, queues, &press);
            queues.push_ended(press);
        }
        true
    }

    /// Final drain at server shutdown, on the host thread.
    ///
    /// Unregisters every registered panel, completes presses that already
    /// ran and abandons the rest. Later presses fail with
    /// [`PressError::ShuttingDown`].
    pub fn teardown<H: PanelHost + ?Sized>(&self, host: &mut H) {
        for panel in self.close_all() {
            if panel.is_registered() {
                host.unregister(&panel);
                panel.set_registered(false);
            }
        }
        tracing::info!("panel registry drained");
    }

    /// Shut down without a host at hand.
    ///
    /// Press waiters are released and panels closed as in
    /// [`teardown`](Self::teardown), but the host is never told to forget
    /// panels it still has registered.
    pub fn abandon(&self) {
        let stranded = self
            .close_all()
            .iter()
            .filter(|panel| panel.is_registered())
            .count();
        if stranded > 0 {
            tracing::warn!(panels = stranded, "registry abandoned with panels still registered");
        }
    }

    /// Mark the registry shut down, settle every press and close every
    /// panel. Returns the panels that were live.
    fn close_all(&self) -> Vec<Arc<PanelResource>> {
        let mut guard = self.inner.lock();
        guard.shut_down = true;
        let inner = &mut *guard;

        for press in inner.queues.drain_ended() {
            press.complete();
        }
        let abandoned = inner.queues.drain_presses();
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "abandoning queued presses");
        }
        for press in abandoned {
            press.abandon();
        }
        inner.queues.drain_refresh();
        inner.queues.drain_register();

        let mut panels: Vec<Arc<PanelResource>> = inner.queues.drain_unregister().into();
        panels.extend(inner.panels.drain().map(|(_, panel)| panel));
        for panel in &panels {
            panel.mark_closed();
        }
        panels
    }
}

fn add_follower(panel: &Arc<PanelResource>, kind: FollowerKind) {
    let count = panel.add_follower(kind);
    // A newly followed format has nothing cached yet.
    if count == 1 && matches!(kind, FollowerKind::Image(_)) {
        panel.mark_dirty();
    }
}

fn release_locked(inner: &mut RegistryInner, panel: &Arc<PanelResource>, kind: FollowerKind) {
    if panel.remove_follower(kind) == 0 {
        inner.panels.remove(panel.key());
        inner.queues.push_unregister(Arc::clone(panel));
        tracing::debug!(key = %panel.key(), id = panel.id(), "last follower left");
    }
}

fn execute_press<H: PanelHost + ?Sized>(
    host: &mut H,
    queues: &mut HostBridgeQueues,
    press: &PendingPress,
) {
    let panel = &press.panel;
    if !panel.is_registered() {
        tracing::debug!(key = %panel.key(), button = press.button, "press on unregistered panel");
        return;
    }
    if let Some(action) = ButtonAction::from_id(press.button) {
        host.press(panel, action);
        if action == ButtonAction::Power {
            panel.mark_closed();
        } else {
            queues.push_refresh(Arc::clone(panel));
        }
    }
    panel.set_labels(&host.labels(panel));
}

/// A follower slot on a panel, released when dropped.
pub struct FollowerGuard {
    registry: ResourceRegistry,
    panel: Arc<PanelResource>,
    kind: FollowerKind,
}

impl FollowerGuard {
    pub fn panel(&self) -> &Arc<PanelResource> {
        &self.panel
    }

    pub fn kind(&self) -> FollowerKind {
        self.kind
    }
}

impl Deref for FollowerGuard {
    type Target = PanelResource;

    fn deref(&self) -> &PanelResource {
        &self.panel
    }
}

impl Drop for FollowerGuard {
    fn drop(&mut self) {
        self.registry.release(&self.panel, self.kind);
    }
}
