//! Staggered racing of connection attempts, for dual-stack dialing.
//!
//! Attempts are started one at a time. The next attempt starts as soon as the
//! running one fails, or once the fallback delay passes without an answer, so a
//! slow address family never holds up a healthy one for long. The first success
//! wins and every other attempt is dropped.
//!
//! Futures are polled in place; nothing is spawned onto the runtime.

use std::collections::VecDeque;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::trace;

use crate::BoxFuture;

/// Why an [`EyeballSet`] finished without a winner.
#[non_exhaustive]
#[derive(Debug, PartialEq, Eq)]
pub enum HappyEyeballsError<T> {
    /// The overall timeout elapsed.
    Timeout(Duration),

    /// There was nothing to attempt.
    NoProgress,

    /// Every attempt failed. Holds the error of the first attempt to fail.
    Error(T),
}

impl<T> fmt::Display for HappyEyeballsError<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProgress => write!(f, "no progress can be made"),
            Self::Error(e) => write!(f, "error: {e}"),
            Self::Timeout(d) => write!(f, "timeout: {}ms", d.as_millis()),
        }
    }
}

impl<T> std::error::Error for HappyEyeballsError<T>
where
    T: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

type HappyEyeballsResult<T, E> = Result<T, HappyEyeballsError<E>>;

/// A queue of connection attempts raced with a fallback delay.
///
/// With no `delay`, attempts run strictly one after another. With a zero
/// `delay`, all attempts start together. The optional `timeout` bounds the
/// whole set, not each attempt.
#[derive(Debug)]
pub struct EyeballSet<F, T, E> {
    queue: VecDeque<F>,
    tasks: FuturesUnordered<F>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    started: Option<Instant>,
    error: Option<E>,
    result: PhantomData<fn() -> T>,
}

impl<F, T, E> EyeballSet<F, T, E> {
    /// Create an empty set.
    pub fn new(delay: Option<Duration>, timeout: Option<Duration>) -> Self {
        Self {
            queue: VecDeque::new(),
            tasks: FuturesUnordered::new(),
            delay,
            timeout,
            started: None,
            error: None,
            result: PhantomData,
        }
    }

    /// Returns `true` if there are no attempts queued or running.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.queue.is_empty()
    }

    /// Number of attempts queued or running.
    pub fn len(&self) -> usize {
        self.tasks.len() + self.queue.len()
    }

    /// Queue an attempt. Attempts start in the order they were pushed.
    pub fn push(&mut self, future: F)
    where
        F: Future<Output = Result<T, E>>,
    {
        self.queue.push_back(future);
    }
}

enum Eyeball<T> {
    Ok(T),
    Error,
    Delayed,
    Exhausted,
}

impl<F, T, E> EyeballSet<F, T, E>
where
    F: Future<Output = Result<T, E>>,
{
    async fn join_next(&mut self) -> Eyeball<T> {
        match self.tasks.next().await {
            Some(Ok(outcome)) => Eyeball::Ok(outcome),
            Some(Err(e)) => {
                if self.error.is_none() {
                    trace!("first attempt error");
                    self.error = Some(e);
                } else {
                    trace!("attempt error");
                }
                Eyeball::Error
            }
            None => Eyeball::Exhausted,
        }
    }

    async fn join_next_or_delay(&mut self) -> Eyeball<T> {
        match self.delay {
            Some(delay) => tokio::time::timeout(delay, self.join_next())
                .await
                .unwrap_or(Eyeball::Delayed),
            None => self.join_next().await,
        }
    }

    async fn process_all(&mut self) -> HappyEyeballsResult<T, E> {
        if let Some(first) = self.queue.pop_front() {
            self.tasks.push(first);
        }

        while !self.queue.is_empty() {
            match self.join_next_or_delay().await {
                Eyeball::Ok(outcome) => return Ok(outcome),
                Eyeball::Delayed => trace!("fallback delay elapsed, starting next attempt"),
                Eyeball::Error | Eyeball::Exhausted => {}
            }

            if let Some(next) = self.queue.pop_front() {
                self.tasks.push(next);
            }
        }

        loop {
            match self.join_next().await {
                Eyeball::Ok(outcome) => return Ok(outcome),
                Eyeball::Error | Eyeball::Delayed => continue,
                Eyeball::Exhausted => {
                    trace!("exhausted attempts");
                    return Err(self
                        .error
                        .take()
                        .map(HappyEyeballsError::Error)
                        .unwrap_or(HappyEyeballsError::NoProgress));
                }
            }
        }
    }

    /// Run the attempts, returning the first success.
    pub async fn finish(&mut self) -> HappyEyeballsResult<T, E> {
        let started = *self.started.get_or_insert_with(Instant::now);

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.process_all())
                .await
                .unwrap_or_else(|_| Err(HappyEyeballsError::Timeout(started.elapsed()))),
            None => self.process_all().await,
        }
    }
}

impl<F, T, E> IntoFuture for EyeballSet<F, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    type Output = HappyEyeballsResult<T, E>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(mut self) -> Self::IntoFuture {
        Box::pin(async move { self.finish().await })
    }
}

impl<F, T, E> Extend<F> for EyeballSet<F, T, E>
where
    F: Future<Output = Result<T, E>>,
{
    fn extend<I: IntoIterator<Item = F>>(&mut self, iter: I) {
        self.queue.extend(iter);
    }
}
