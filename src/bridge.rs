//! Queues that carry host-affecting work from connection threads to the
//! host tick.
//!
//! Every queue lives behind the registry lock; producers append from any
//! connection thread and only the host tick drains them.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::panel::PanelResource;

/// A button press waiting for the host tick.
///
/// The requesting thread holds the panel's press gate and blocks on the
/// other end of `done`.
#[derive(Debug)]
pub struct PendingPress {
    pub panel: Arc<PanelResource>,
    pub button: i32,
    done: oneshot::Sender<()>,
}

impl PendingPress {
    pub fn new(panel: Arc<PanelResource>, button: i32) -> (Self, oneshot::Receiver<()>) {
        let (done, rx) = oneshot::channel();
        (Self { panel, button, done }, rx)
    }

    /// Wake the waiter and release the press gate.
    pub fn complete(self) {
        let _ = self.done.send(());
        self.panel.gate().give();
    }

    /// Release the gate without signalling success; the waiter sees the
    /// sender dropped.
    pub fn abandon(self) {
        let Self { panel, done, .. } = self;
        drop(done);
        panel.gate().give();
    }
}

#[derive(Debug, Default)]
pub struct HostBridgeQueues {
    register: VecDeque<Arc<PanelResource>>,
    unregister: VecDeque<Arc<PanelResource>>,
    force_refresh: VecDeque<Arc<PanelResource>>,
    presses: VecDeque<PendingPress>,
    /// Presses executed on the previous tick, signalled on the next one.
    ended: VecDeque<PendingPress>,
}

impl HostBridgeQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_register(&mut self, panel: Arc<PanelResource>) {
        self.register.push_back(panel);
    }

    pub fn push_unregister(&mut self, panel: Arc<PanelResource>) {
        self.unregister.push_back(panel);
    }

    /// Queue a forced refresh. A panel already waiting is not queued twice.
    pub fn push_refresh(&mut self, panel: Arc<PanelResource>) {
        if !self.force_refresh.iter().any(|p| Arc::ptr_eq(p, &panel)) {
            self.force_refresh.push_back(panel);
        }
    }

    pub fn push_press(&mut self, press: PendingPress) {
        self.presses.push_back(press);
    }

    pub(crate) fn push_ended(&mut self, press: PendingPress) {
        self.ended.push_back(press);
    }

    pub fn drain_refresh(&mut self) -> VecDeque<Arc<PanelResource>> {
        std::mem::take(&mut self.force_refresh)
    }

    pub fn drain_register(&mut self) -> VecDeque<Arc<PanelResource>> {
        std::mem::take(&mut self.register)
    }

    pub fn drain_unregister(&mut self) -> VecDeque<Arc<PanelResource>> {
        std::mem::take(&mut self.unregister)
    }

    pub fn drain_ended(&mut self) -> VecDeque<PendingPress> {
        std::mem::take(&mut self.ended)
    }

    pub fn drain_presses(&mut self) -> VecDeque<PendingPress> {
        std::mem::take(&mut self.presses)
    }

    #[cfg(test)]
    pub fn pending_presses(&self) -> usize {
        self.presses.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.register.is_empty()
            && self.unregister.is_empty()
            && self.force_refresh.is_empty()
            && self.presses.is_empty()
            && self.ended.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::ImageEncoder;

    fn panel(id: u64) -> Arc<PanelResource> {
        Arc::new(PanelResource::new(id, format!("p{id}"), Arc::new(ImageEncoder)))
    }

    #[test]
    fn refresh_is_deduplicated() {
        let mut queues = HostBridgeQueues::new();
        let a = panel(1);
        let b = panel(2);
        queues.push_refresh(a.clone());
        queues.push_refresh(b.clone());
        queues.push_refresh(a.clone());
        let drained = queues.drain_refresh();
        assert_eq!(drained.len(), 2);
        assert!(Arc::ptr_eq(&drained[0], &a));
        assert!(Arc::ptr_eq(&drained[1], &b));
        assert!(queues.is_empty());
    }

    #[test]
    fn queues_are_fifo() {
        let mut queues = HostBridgeQueues::new();
        for id in 1..=3 {
            queues.push_register(panel(id));
        }
        let ids: Vec<u64> = queues.drain_register().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn complete_signals_and_releases_gate() {
        let p = panel(1);
        p.gate().take();
        let (press, mut rx) = PendingPress::new(p.clone(), 4);
        press.complete();
        assert!(rx.try_recv().is_ok());
        assert!(!p.gate().is_busy());
    }

    #[test]
    fn abandon_drops_sender_and_releases_gate() {
        let p = panel(1);
        p.gate().take();
        let (press, mut rx) = PendingPress::new(p.clone(), 4);
        press.abandon();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(!p.gate().is_busy());
    }
}
