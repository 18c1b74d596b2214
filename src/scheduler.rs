//! Background evaluation scheduling.
//!
//! Evaluations run on a small worker pool; a dispatcher thread serializes
//! them per node so two evaluations of the same `.pro` file never run
//! concurrently.  Requests come in two flavors: Now (user action, run
//! immediately) and Later (file-change debounce).  A request arriving
//! while the node is already being evaluated queues behind the in-flight
//! run and starts once it finishes; requests queued for the same node
//! coalesce into one.  Cancellation only happens on teardown, via
//! [`Scheduler::cancel_all`].
//!
//! Merging results back into the tree is the caller's job: completions
//! are delivered over a channel and the caller acknowledges each one, so
//! the pending counter reflects work that has not been merged yet.

use crate::errors::Result;
use crate::evalresult::EvalResult;
use crate::evaluate::{evaluate, CancellationToken, EvalInput};
use crate::nodes::NodeId;
use crossbeam_channel::{after, never, select, unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum When {
    /// Evaluate as soon as a worker is free.
    Now,
    /// Evaluate after the debounce delay, coalescing bursts.
    Later,
}

/// The function actually evaluating one input.  Injectable so the
/// scheduling behavior can be tested without touching the filesystem.
pub type WorkerFn =
    Arc<dyn Fn(&EvalInput, &CancellationToken) -> EvalResult + Send + Sync>;

pub struct Completion {
    pub node: NodeId,
    pub result: EvalResult,
    /// Cancelled means the round was torn down mid-flight and the result
    /// must be discarded.
    pub token: CancellationToken,
}

enum Command {
    Submit {
        node: NodeId,
        input: EvalInput,
        when: When,
    },
    CancelAll,
    Shutdown,
}

struct Job {
    node: NodeId,
    input: EvalInput,
    token: CancellationToken,
}

pub struct Scheduler {
    cmd_tx: Sender<Command>,
    completions_rx: Receiver<Completion>,
    pending: Arc<AtomicUsize>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// A scheduler evaluating with [`evaluate`].
    pub fn start(debounce: Duration) -> Result<Scheduler> {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4)
            .min(8);
        Self::with_worker(Arc::new(evaluate), workers, debounce)
    }

    pub fn with_worker(
        worker: WorkerFn,
        workers: usize,
        debounce: Duration,
    ) -> Result<Scheduler> {
        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let (job_tx, job_rx) = unbounded::<Job>();
        let (done_tx, done_rx) = unbounded::<Completion>();
        let (completions_tx, completions_rx) = unbounded::<Completion>();
        let pending = Arc::new(AtomicUsize::new(0));

        let mut threads = vec![];
        for i in 0..workers.max(1) {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let worker = worker.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("eval-worker-{}", i))
                    .spawn(move || {
                        for job in job_rx {
                            let result = worker(&job.input, &job.token);
                            let sent = done_tx.send(Completion {
                                node: job.node,
                                result,
                                token: job.token,
                            });
                            if sent.is_err() {
                                break;
                            }
                        }
                    })?,
            );
        }

        let dispatcher_pending = pending.clone();
        threads.push(
            std::thread::Builder::new()
                .name("eval-dispatch".into())
                .spawn(move || {
                    Dispatcher {
                        debounce,
                        entries: HashMap::new(),
                        job_tx,
                        completions_tx,
                        pending: dispatcher_pending,
                    }
                    .run(cmd_rx, done_rx)
                })?,
        );

        Ok(Scheduler {
            cmd_tx,
            completions_rx,
            pending,
            threads,
        })
    }

    /// Request an evaluation.  Counts as pending until the matching
    /// completion is acknowledged (or the request coalesces away).
    pub fn submit(&self, node: NodeId, input: EvalInput, when: When) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        //  Send only fails after shutdown, when nobody watches pending.
        let _ = self.cmd_tx.send(Command::Submit { node, input, when });
    }

    pub fn completions(&self) -> &Receiver<Completion> {
        &self.completions_rx
    }

    /// Evaluations requested but not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Acknowledge one delivered completion, merged or discarded.
    pub fn ack(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Cancel every in-flight evaluation and drop every queued one.
    /// In-flight runs still deliver a (cancelled) completion that must be
    /// acknowledged; queued requests vanish without one.
    pub fn cancel_all(&self) {
        let _ = self.cmd_tx.send(Command::CancelAll);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

struct Queued {
    input: EvalInput,
    deadline: Instant,
}

#[derive(Default)]
struct Entry {
    running: Option<CancellationToken>,
    queued: Option<Queued>,
}

struct Dispatcher {
    debounce: Duration,
    entries: HashMap<NodeId, Entry>,
    job_tx: Sender<Job>,
    completions_tx: Sender<Completion>,
    pending: Arc<AtomicUsize>,
}

impl Dispatcher {
    fn run(mut self, cmd_rx: Receiver<Command>, done_rx: Receiver<Completion>) {
        loop {
            let timer = match self.next_deadline() {
                Some(deadline) => {
                    after(deadline.saturating_duration_since(Instant::now()))
                }
                None => never(),
            };
            select! {
                recv(cmd_rx) -> msg => match msg {
                    Ok(Command::Submit { node, input, when }) => {
                        self.handle_submit(node, input, when);
                    }
                    Ok(Command::CancelAll) => self.handle_cancel_all(),
                    Ok(Command::Shutdown) | Err(_) => return,
                },
                recv(done_rx) -> msg => match msg {
                    Ok(done) => self.handle_done(done),
                    Err(_) => return,
                },
                recv(timer) -> _ => {}
            }
            self.start_due();
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.running.is_none())
            .filter_map(|e| e.queued.as_ref().map(|q| q.deadline))
            .min()
    }

    fn handle_submit(&mut self, node: NodeId, input: EvalInput, when: When) {
        let deadline = match when {
            When::Now => Instant::now(),
            When::Later => Instant::now() + self.debounce,
        };
        let entry = self.entries.entry(node).or_default();
        //  An in-flight run is left alone; the new request waits behind
        //  it and starts when its completion arrives.
        match &mut entry.queued {
            Some(q) => {
                //  Coalesce: one evaluation will serve both requests.
                q.input = input;
                q.deadline = q.deadline.min(deadline);
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
            None => entry.queued = Some(Queued { input, deadline }),
        }
    }

    fn handle_cancel_all(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(token) = &entry.running {
                token.cancel();
            }
            if entry.queued.take().is_some() {
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn handle_done(&mut self, done: Completion) {
        if let Some(entry) = self.entries.get_mut(&done.node) {
            entry.running = None;
        }
        let _ = self.completions_tx.send(done);
    }

    fn start_due(&mut self) {
        let now = Instant::now();
        for (node, entry) in self.entries.iter_mut() {
            if entry.running.is_some() {
                continue;
            }
            let due = entry
                .queued
                .as_ref()
                .map(|q| q.deadline <= now)
                .unwrap_or(false);
            if !due {
                continue;
            }
            let queued = entry.queued.take().unwrap();
            let token = CancellationToken::new();
            entry.running = Some(token.clone());
            tracing::debug!("evaluating {}", queued.input.pro_file.display());
            let _ = self.job_tx.send(Job {
                node: *node,
                input: queued.input,
                token,
            });
        }
    }
}
