use kernel_sync::{LockMode, SpinMutex, TicketMutex, WouldBlock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn guard_releases_on_drop() {
    let m = SpinMutex::new(0_u32);

    {
        let mut g = m.lock();
        *g = 41;
        assert!(m.is_locked());
    }
    assert!(!m.is_locked());

    let mut g = m.lock();
    *g += 1;
    assert_eq!(*g, 42);
}

#[test]
fn try_lock_fails_while_held() {
    let m = TicketMutex::new(1_u8);

    let g1 = m.try_lock();
    assert!(g1.is_some());
    assert!(m.try_lock().is_none());

    drop(g1);
    assert!(m.try_lock().is_some());
}

#[test]
fn failed_try_lock_does_not_release_holder() {
    let m = SpinMutex::new(());
    let _held = m.lock();
    assert!(m.try_lock().is_none());
    assert!(m.is_locked());
}

#[test]
fn non_blocking_acquire_reports_would_block() {
    let m = SpinMutex::new(5_u8);
    let held = m.acquire(LockMode::Blocking).expect("free lock");
    assert_eq!(m.acquire(LockMode::NonBlocking).err(), Some(WouldBlock));
    drop(held);
    assert_eq!(*m.acquire(LockMode::NonBlocking).expect("released"), 5);
}

#[test]
fn with_lock_returns_value_and_unlocks() {
    let m = TicketMutex::new(String::from("a"));
    let len = m.with_lock(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);
    assert_eq!(m.with_lock(|s| s.clone()), "ab");
}

#[test]
fn get_mut_and_into_inner_bypass_the_lock() {
    let mut m = SpinMutex::new(vec![1, 2, 3]);
    m.get_mut().push(4);
    assert_eq!(m.into_inner(), vec![1, 2, 3, 4]);
}

fn hammer<M, F>(lock: Arc<M>, with: F) -> usize
where
    M: Send + Sync + 'static,
    F: Fn(&M, &mut dyn FnMut(&mut usize)) + Send + Sync + Copy + 'static,
{
    let threads = 8;
    let iters = 5_000;

    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    with(&*lock, &mut |v: &mut usize| {
                        let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "mutual exclusion violated");
                        *v += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    threads * iters
}

#[test]
fn spin_mutex_is_exclusive_under_contention() {
    let lock = Arc::new(SpinMutex::new(0_usize));
    let expected = hammer(Arc::clone(&lock), |m, f| m.with_lock(|v| f(v)));
    assert_eq!(lock.with_lock(|v| *v), expected);
}

#[test]
fn ticket_mutex_is_exclusive_under_contention() {
    let lock = Arc::new(TicketMutex::new(0_usize));
    let expected = hammer(Arc::clone(&lock), |m, f| m.with_lock(|v| f(v)));
    assert_eq!(lock.with_lock(|v| *v), expected);
}

#[test]
fn lock_is_released_on_panic() {
    let m = TicketMutex::new(0_u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        m.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(m.with_lock(|v| *v), 123);
}

#[test]
fn mutexes_are_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    takes_sync(&SpinMutex::new(0_u8));
    takes_sync(&TicketMutex::new(0_u8));
}
