use parking_lot::{Condvar, Mutex};

/// Single-slot press gate.
///
/// A connection thread takes the gate before queueing a press and the host
/// tick gives it back once the press has completed, so the releasing thread
/// is usually not the one that acquired it.
#[derive(Debug, Default)]
pub struct PressGate {
    busy: Mutex<bool>,
    released: Condvar,
}

impl PressGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the gate is free, then take it.
    pub fn take(&self) {
        let mut busy = self.busy.lock();
        while *busy {
            self.released.wait(&mut busy);
        }
        *busy = true;
    }

    /// Take the gate only if it is free right now.
    #[cfg(test)]
    pub fn try_take(&self) -> bool {
        let mut busy = self.busy.lock();
        if *busy {
            return false;
        }
        *busy = true;
        true
    }

    /// Release the gate. May be called from any thread.
    pub fn give(&self) {
        *self.busy.lock() = false;
        self.released.notify_one();
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.lock()
    }
}
