// Asynchronous batches: every operation of a batch is submitted up front to a pool of workers, each
// submission gets a completion, and the caller then waits on the completions in submission order.

use anyhow::{bail, Context, Result};
use std::sync::mpsc;
use std::sync::{Condvar, Mutex};
use std::thread;

/// A one-shot result slot that a worker fills and the submitter waits on.

pub struct Completion<T> {
    slot: Mutex<Option<Result<T>>>,
    cv: Condvar,
}

impl<T> Completion<T> {
    pub fn new() -> Completion<T> {
        Completion {
            slot: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    pub fn complete(&self, result: Result<T>) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(result);
        self.cv.notify_all();
    }

    /// Block until the result is available and take it.  A completion can be waited on once.

    pub fn wait(&self) -> Result<T> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            slot = self.cv.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Completion<T> {
        Completion::new()
    }
}

/// Run `op(0) .. op(count-1)` on `workers` threads and return the results in submission order.
/// The first failed operation, in submission order, fails the batch; the remaining operations still
/// run to completion before this returns.

pub fn submit_and_wait<T, F>(workers: usize, count: usize, op: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync,
{
    if workers == 0 {
        bail!("At least one worker is required");
    }
    let completions = (0..count).map(|_| Completion::new()).collect::<Vec<Completion<T>>>();
    let (tx, rx) = mpsc::channel::<usize>();
    let rx = Mutex::new(rx);

    thread::scope(|s| {
        for _ in 0..workers.min(count.max(1)) {
            s.spawn(|| loop {
                let next = rx.lock().unwrap_or_else(|e| e.into_inner()).recv();
                match next {
                    Ok(j) => completions[j].complete(op(j)),
                    Err(_) => break,
                }
            });
        }

        for j in 0..count {
            tx.send(j)?;
        }
        drop(tx);

        let mut results = Vec::with_capacity(count);
        for (j, c) in completions.iter().enumerate() {
            results.push(c.wait().with_context(|| format!("Operation {j}"))?);
        }
        Ok(results)
    })
}

#[test]
fn test_submit_and_wait() {
    let r = submit_and_wait(4, 100, |j| Ok(j * 2)).unwrap();
    assert!(r.len() == 100);
    assert!(r.iter().enumerate().all(|(j, v)| *v == j * 2));

    let r = submit_and_wait(4, 0, |j| Ok(j)).unwrap();
    assert!(r.is_empty());

    assert!(submit_and_wait(0, 1, |j| Ok(j)).is_err());
}

#[test]
fn test_submit_and_wait_error() {
    let ran = std::sync::atomic::AtomicUsize::new(0);
    let r = submit_and_wait(3, 10, |j| {
        ran.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if j == 5 {
            bail!("boom")
        }
        Ok(j)
    });
    let e = r.unwrap_err();
    assert!(format!("{:#}", e) == "Operation 5: boom");
    assert!(ran.load(std::sync::atomic::Ordering::SeqCst) == 10);
}

#[test]
fn test_completion() {
    let c = std::sync::Arc::new(Completion::new());
    let c2 = c.clone();
    let t = thread::spawn(move || c2.complete(Ok("done")));
    assert!(c.wait().unwrap() == "done");
    t.join().unwrap();
}
