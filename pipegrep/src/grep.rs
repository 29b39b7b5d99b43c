//! The concurrent search pipeline.
//!
//! [`Grep`] fans line batches out from one reader thread to N matcher
//! workers over a bounded request queue, and fans matched lines back in
//! over a bounded result queue. Completion is signaled with the queue
//! sentinel from [`crate::queue`]; a drop guard guarantees the sentinels
//! are propagated and the workers joined on every exit path, so a caller
//! draining the match iterator never hangs.

use regex::Regex;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

use crate::errors::{GrepError, GrepResult};
use crate::queue::{Envelope, Queue};

/// Lines accumulated per request-queue envelope, amortizing queue
/// synchronization across the batch.
const BATCH_SIZE: usize = 100;

/// In-flight line capacity of the result queue.
const RESULT_QUEUE_CAPACITY: usize = 1000;

/// Idempotent, non-blocking cancellation handle for one pipeline run.
///
/// The flag is write-once per run and read with relaxed ordering: the
/// reader checks it between source elements, so at most one extra element
/// may be consumed after cancellation is requested.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Requests cancellation. Safe to call from any thread, any number of
    /// times; workers finish batches already enqueued.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A running search: a lazy stream of matched lines plus its cancel handle.
pub struct GrepRun {
    /// Matched lines, in unspecified order relative to the input. Always
    /// terminates once the pipeline has finalized, including after
    /// cancellation or a source error.
    pub matches: Matches,
    cancel: CancelToken,
}

impl GrepRun {
    /// Requests cancellation of this run. See [`CancelToken::cancel`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a clonable handle that can cancel this run from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Iterator over matched lines from a [`GrepRun`].
pub struct Matches {
    inner: crate::queue::Iter<String>,
}

impl Iterator for Matches {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }
}

/// A compiled search pattern bound to a worker thread count.
///
/// Construction is the only point where the pattern is validated; a built
/// `Grep` can be run any number of times.
#[derive(Debug, Clone)]
pub struct Grep {
    regex: Regex,
    threads: usize,
}

impl Grep {
    /// Compiles `pattern` and validates `threads`.
    ///
    /// # Errors
    ///
    /// Returns [`GrepError::InvalidThreadCount`] when `threads` is zero and
    /// [`GrepError::InvalidRegex`] when the pattern does not compile.
    pub fn new(pattern: &str, threads: usize) -> GrepResult<Self> {
        if threads < 1 {
            return Err(GrepError::InvalidThreadCount(threads));
        }
        let regex = Regex::new(pattern)?;
        Ok(Self { regex, threads })
    }

    /// The source pattern this searcher was compiled from.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Starts the pipeline over `source` and returns immediately.
    ///
    /// `source` is any sequence of newline-stripped lines; the
    /// `io::Result` item type is what [`std::io::BufRead::lines`] produces,
    /// so files and stdin plug in directly. An `Err` item stops reading:
    /// the error is logged at the reader boundary and never surfaced
    /// through [`GrepRun::matches`], and any lines buffered in an unflushed
    /// partial batch are dropped. This favors liveness over completeness;
    /// callers that need error visibility must wrap the source themselves.
    pub fn run<I>(&self, source: I) -> GrepRun
    where
        I: IntoIterator<Item = io::Result<String>> + Send + 'static,
    {
        let request: Queue<Vec<String>> = Queue::bounded(self.threads * 2);
        let results: Queue<String> = Queue::bounded(RESULT_QUEUE_CAPACITY);
        let cancel = CancelToken::default();

        debug!(
            threads = self.threads,
            pattern = self.regex.as_str(),
            "starting grep pipeline"
        );

        let workers: Vec<JoinHandle<()>> = (0..self.threads)
            .map(|_| {
                let regex = self.regex.clone();
                let request = request.clone();
                let results = results.clone();
                thread::spawn(move || match_batches(&regex, &request, &results))
            })
            .collect();

        // Supervising reader. The finalizer drop guard runs on every exit
        // path, normal, cancelled, errored, or unwinding, so both queues
        // always receive their sentinel and the workers are always joined.
        let flag = cancel.clone();
        let reader_request = request.clone();
        let reader_results = results.clone();
        thread::spawn(move || {
            let _finalize = Finalizer {
                request: reader_request.clone(),
                results: reader_results,
                workers,
            };
            read_source(source, &flag, &reader_request);
        });

        GrepRun {
            matches: Matches {
                inner: results.iter(),
            },
            cancel,
        }
    }
}

/// Worker loop: drain batches from the request queue, forward matching
/// lines to the result queue, exit on the shared sentinel.
fn match_batches(regex: &Regex, request: &Queue<Vec<String>>, results: &Queue<String>) {
    for batch in request.iter() {
        for line in batch {
            if regex.is_match(&line) {
                results.put(Envelope::Value(line));
            }
        }
    }
    trace!("matcher worker done");
}

/// Reader loop: batch source lines onto the request queue, checking the
/// cancel flag before consuming each element.
fn read_source<I>(source: I, cancel: &CancelToken, request: &Queue<Vec<String>>)
where
    I: IntoIterator<Item = io::Result<String>>,
{
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    for line in source {
        if cancel.is_cancelled() {
            debug!("cancellation requested, reader stopping");
            return;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                // Whatever sits in the partial batch is lost with the
                // source; see `Grep::run`.
                warn!(error = %e, dropped = batch.len(), "source failed, reader stopping");
                return;
            }
        };
        batch.push(line);
        if batch.len() >= BATCH_SIZE {
            let full = mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE));
            request.put(Envelope::Value(full));
        }
    }
    if !batch.is_empty() {
        request.put(Envelope::Value(batch));
    }
    debug!("source exhausted, reader stopping");
}

/// Runs the pipeline's shutdown obligations when dropped: one sentinel on
/// the request queue, join every worker, then one sentinel on the result
/// queue. Ordering matters: workers only exit after seeing the request
/// sentinel, and the result sentinel must not be placed while workers may
/// still put matches.
struct Finalizer {
    request: Queue<Vec<String>>,
    results: Queue<String>,
    workers: Vec<JoinHandle<()>>,
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.request.put(Envelope::EndOfQueue);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("matcher worker panicked");
            }
        }
        self.results.put(Envelope::EndOfQueue);
        debug!("grep pipeline finalized");
    }
}
