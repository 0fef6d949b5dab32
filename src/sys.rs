//! Small OS-layer primitives: monitors, rendezvous, environment access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// A mutex paired with a condition variable, guarding a value.
///
/// Worker threads sleep on their monitor while their command deques are
/// empty; queues and events use plain mutexes or their own monitors.
pub struct Monitor<T> {
    lock: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(value: T) -> Monitor<T> {
        Monitor {
            lock: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<T> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn wait<'a>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}

/// A one-shot spin flag used to hand a short acknowledgment between two
/// threads without a lock. The waiting side spins; use only where the
/// signalling side is expected to run promptly (static constructor and
/// destructor service commands).
#[derive(Default)]
pub struct Rendezvous {
    met: AtomicBool,
}

impl Rendezvous {
    pub fn new() -> Rendezvous {
        Rendezvous {
            met: AtomicBool::new(false),
        }
    }

    pub fn signal(&self) {
        self.met.store(true, Ordering::Release);
    }

    pub fn wait(&self) {
        while !self.met.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }
}

/// Returns the value of an environment variable, if set and valid UTF-8.
pub fn env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

pub fn has_env(name: &str) -> bool {
    std::env::var_os(name).is_some()
}

/// The system page size.
pub fn page_size() -> usize {
    unsafe {
        let sz = libc::sysconf(libc::_SC_PAGESIZE);
        if sz <= 0 {
            4096
        } else {
            sz as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rendezvous_meets() {
        let sync = Arc::new(Rendezvous::new());
        let remote = Arc::clone(&sync);
        let handle = thread::spawn(move || remote.signal());
        sync.wait();
        handle.join().unwrap();
    }

    #[test]
    fn page_size_is_a_power_of_two() {
        let sz = page_size();
        assert!(sz.is_power_of_two());
    }
}
