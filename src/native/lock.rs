//! 刚体互斥条带
//!
//! 每个刚体按索引落在一个条带上。锁由显式的守卫对象持有，
//! 守卫可以跨越多次原生调用存活，因此不能借用条带本身。

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Default)]
struct StripeState {
    readers: u32,
    writer: bool,
}

struct Stripe {
    state: Mutex<StripeState>,
    changed: Condvar,
}

pub struct BodyLocks {
    stripes: Vec<Stripe>,
}

impl BodyLocks {
    pub fn new(num_stripes: usize) -> Arc<Self> {
        let stripes = (0..num_stripes.max(1))
            .map(|_| Stripe {
                state: Mutex::new(StripeState::default()),
                changed: Condvar::new(),
            })
            .collect();
        Arc::new(Self { stripes })
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn stripe_of(&self, body_index: u32) -> usize {
        body_index as usize % self.stripes.len()
    }

    fn state(&self, stripe: usize) -> MutexGuard<'_, StripeState> {
        match self.stripes[stripe].state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, stripe: usize, state: MutexGuard<'a, StripeState>) -> MutexGuard<'a, StripeState> {
        match self.stripes[stripe].changed.wait(state) {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 获取读锁，直到守卫释放
    pub fn read(self: &Arc<Self>, body_index: u32) -> StripeGuard {
        let stripe = self.stripe_of(body_index);
        let mut state = self.state(stripe);
        while state.writer {
            state = self.wait(stripe, state);
        }
        state.readers += 1;
        StripeGuard {
            locks: Arc::clone(self),
            stripe,
            write: false,
        }
    }

    /// 获取写锁，直到守卫释放
    pub fn write(self: &Arc<Self>, body_index: u32) -> StripeGuard {
        let stripe = self.stripe_of(body_index);
        let mut state = self.state(stripe);
        while state.writer || state.readers > 0 {
            state = self.wait(stripe, state);
        }
        state.writer = true;
        StripeGuard {
            locks: Arc::clone(self),
            stripe,
            write: true,
        }
    }

    fn unlock(&self, stripe: usize, write: bool) {
        let mut state = self.state(stripe);
        if write {
            state.writer = false;
        } else {
            state.readers = state.readers.saturating_sub(1);
        }
        drop(state);
        self.stripes[stripe].changed.notify_all();
    }
}

/// 条带锁守卫，析构时解锁
pub struct StripeGuard {
    locks: Arc<BodyLocks>,
    stripe: usize,
    write: bool,
}

impl StripeGuard {
    pub fn is_write(&self) -> bool {
        self.write
    }
}

impl Drop for StripeGuard {
    fn drop(&mut self) {
        self.locks.unlock(self.stripe, self.write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_readers_share_a_stripe() {
        let locks = BodyLocks::new(4);
        let a = locks.read(1);
        let b = locks.read(5);
        assert!(!a.is_write());
        drop(a);
        drop(b);
        let w = locks.write(1);
        assert!(w.is_write());
    }

    #[test]
    fn test_writer_blocks_other_writers() {
        let locks = BodyLocks::new(2);
        let guard = locks.write(0);
        let done = Arc::new(AtomicBool::new(false));

        let handle = {
            let locks = Arc::clone(&locks);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let _g = locks.write(2);
                done.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }
}
