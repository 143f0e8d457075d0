//! Drivers that pull parts and run an operation on each of them.
//!
//! Parts are produced by a `next` function that is serialized by the source
//! or destination it draws from, and consumed by a `work` function. Workers
//! stop pulling once any part failed. The first failure is the error the
//! scheduler returns, after every worker has stopped.
use crate::cancel::CancelCause;
use crate::error::{Error, Result};

use futures::stream::{FuturesUnordered, StreamExt as _};
use std::future::Future;

/// The result of an operation on a part that knows where the part belongs.
pub trait Placed {
    /// Offset of the part within the object.
    fn offset(&self) -> u64;
}

/// Run parts one after another.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialScheduler;

impl SerialScheduler {
    pub async fn run<P, R, N, NF, W, WF>(&self, next: N, work: W) -> Result<Vec<R>>
    where
        R: Placed,
        N: Fn() -> NF,
        NF: Future<Output = Result<Option<P>>>,
        W: Fn(P, CancelCause) -> WF,
        WF: Future<Output = Result<R>>,
    {
        let cause = CancelCause::new();
        let done = worker(0, &next, &work, &cause).await;
        finish(done, &cause)
    }
}

/// Run parts on a bounded pool of `width` workers.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentScheduler {
    width: usize,
}

impl ConcurrentScheduler {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub async fn run<P, R, N, NF, W, WF>(&self, next: N, work: W) -> Result<Vec<R>>
    where
        R: Placed,
        N: Fn() -> NF,
        NF: Future<Output = Result<Option<P>>>,
        W: Fn(P, CancelCause) -> WF,
        WF: Future<Output = Result<R>>,
    {
        let cause = CancelCause::new();
        let mut workers = (0..self.width)
            .map(|id| worker(id, &next, &work, &cause))
            .collect::<FuturesUnordered<_>>();

        let mut done = Vec::new();
        while let Some(mut parts) = workers.next().await {
            done.append(&mut parts);
        }
        finish(done, &cause)
    }
}

/// Either of the schedulers, picked by the concurrency a transfer allows.
#[derive(Debug, Clone, Copy)]
pub enum Scheduler {
    Serial(SerialScheduler),
    Concurrent(ConcurrentScheduler),
}

impl Scheduler {
    /// A concurrency of 0 or 1 runs parts serially.
    pub fn with_concurrency(concurrency: usize) -> Self {
        if concurrency <= 1 {
            Self::Serial(SerialScheduler)
        } else {
            Self::Concurrent(ConcurrentScheduler::new(concurrency))
        }
    }

    pub async fn run<P, R, N, NF, W, WF>(&self, next: N, work: W) -> Result<Vec<R>>
    where
        R: Placed,
        N: Fn() -> NF,
        NF: Future<Output = Result<Option<P>>>,
        W: Fn(P, CancelCause) -> WF,
        WF: Future<Output = Result<R>>,
    {
        match self {
            Self::Serial(s) => s.run(next, work).await,
            Self::Concurrent(s) => s.run(next, work).await,
        }
    }
}

async fn worker<P, R, N, NF, W, WF>(id: usize, next: &N, work: &W, cause: &CancelCause) -> Vec<R>
where
    N: Fn() -> NF,
    NF: Future<Output = Result<Option<P>>>,
    W: Fn(P, CancelCause) -> WF,
    WF: Future<Output = Result<R>>,
{
    let mut done = Vec::new();
    while !cause.is_cancelled() {
        let part = match next().await {
            Ok(Some(part)) => part,
            Ok(None) => break,
            Err(e) => {
                fail(id, cause, e);
                break;
            }
        };
        match work(part, cause.clone()).await {
            Ok(result) => done.push(result),
            Err(e) => {
                fail(id, cause, e);
                break;
            }
        }
    }
    trace!(worker = id, parts = done.len(), "worker stopped");
    done
}

fn fail(_id: usize, cause: &CancelCause, e: Error) {
    let kind = e.kind();
    if cause.cancel(e) {
        warn!(worker = _id, %kind, "part failed, cancelling the others");
    }
}

fn finish<R: Placed>(mut done: Vec<R>, cause: &CancelCause) -> Result<Vec<R>> {
    if let Some(e) = cause.take_reason() {
        return Err(e);
    }
    done.sort_by_key(Placed::offset);
    Ok(done)
}
