#![allow(dead_code)]

use kernel_sync::Notify;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Condvar, Mutex};

/// Condition-variable backed wait queue standing in for the scheduler.
#[derive(Default)]
pub struct CondvarNotify {
    epoch: Mutex<u64>,
    changed: Condvar,
}

impl CondvarNotify {
    pub fn leaked() -> &'static Self {
        Box::leak(Box::default())
    }
}

impl Notify for CondvarNotify {
    fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap()
    }

    fn wait(&self, observed: u64) {
        let guard = self.epoch.lock().unwrap();
        let _guard = self
            .changed
            .wait_while(guard, |epoch| *epoch == observed)
            .unwrap();
    }

    fn notify_all(&self) {
        *self.epoch.lock().unwrap() += 1;
        self.changed.notify_all();
    }
}

/// Wait queue that parks the first blocking caller while it still holds the
/// allocator lock, so tests can observe the lock as busy.
///
/// The test thread meets [`held`](Self::held) once the lock is taken and
/// [`resume`](Self::resume) to let the caller continue. Afterwards `wait`
/// returns immediately and the caller simply retries.
pub struct StallingNotify {
    pub held: Barrier,
    pub resume: Barrier,
    stalled: AtomicBool,
}

impl StallingNotify {
    pub fn leaked() -> &'static Self {
        Box::leak(Box::new(Self {
            held: Barrier::new(2),
            resume: Barrier::new(2),
            stalled: AtomicBool::new(false),
        }))
    }
}

impl Notify for StallingNotify {
    fn epoch(&self) -> u64 {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            self.held.wait();
            self.resume.wait();
        }
        0
    }

    fn wait(&self, _observed: u64) {
        std::thread::yield_now();
    }

    fn notify_all(&self) {}
}
