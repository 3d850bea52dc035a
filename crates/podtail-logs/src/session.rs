use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use podtail_types::{LogRequest, ResourcePath, SessionOptions};

use crate::buffer::{ArcLogLine, LineBuffer};
use crate::error::{LogError, Result};
use crate::filter::{self, FilterSpec};
use crate::observer::{LogObserver, ObserverList, Termination};
use crate::source::{LineStream, LogSource};

/// Lower bound for the flush cadence (tokio rejects a zero interval)
const MIN_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not started yet
    Idle,
    /// Background feed active
    Running,
    /// Feed ended; `start` may run it again
    Stopped,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Clear only when a filter is active, then data
    Notify,
    /// Always clear, then data
    Reset,
    /// `Notify`, but only for new lines and while not paused
    FlushIfDirty,
}

/// Everything guarded by the session's data lock
struct Inner {
    buffer: LineBuffer,
    filter: Option<FilterSpec>,
    /// New lines since the last flush
    dirty: bool,
    paused: bool,
    show_timestamps: bool,
}

/// One `start` invocation
struct Run {
    generation: u64,
    cancel: CancellationToken,
    terminated: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl Run {
    /// Cancel the feed and abort its task
    fn shutdown(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

struct Lifecycle {
    state: SessionState,
    source: Option<Arc<dyn LogSource>>,
    path: Option<ResourcePath>,
    /// Container resolved at init (explicit or default)
    resolved_container: String,
    /// Container currently tailed; empty means all containers
    container: String,
    since_seconds: Option<i64>,
    generation: u64,
    run: Option<Run>,
}

struct Shared {
    options: SessionOptions,
    inner: Mutex<Inner>,
    lifecycle: Mutex<Lifecycle>,
    observers: ObserverList,
    /// Serializes notifications; reentrant so observers may call back in
    delivery: ReentrantMutex<()>,
}

/// Live log-tailing session for one resource/container.
///
/// Cloning is cheap and yields a handle to the same session.
#[derive(Clone)]
pub struct LogSession {
    shared: Arc<Shared>,
}

impl LogSession {
    /// Create an idle session; call `init` before `start`
    pub fn new(options: SessionOptions) -> Self {
        let inner = Inner {
            buffer: LineBuffer::new(options.capacity),
            filter: None,
            dirty: false,
            paused: false,
            show_timestamps: options.show_timestamps,
        };
        let lifecycle = Lifecycle {
            state: SessionState::Idle,
            source: None,
            path: None,
            resolved_container: String::new(),
            container: String::new(),
            since_seconds: options.since_seconds,
            generation: 0,
            run: None,
        };

        Self {
            shared: Arc::new(Shared {
                options,
                inner: Mutex::new(inner),
                lifecycle: Mutex::new(lifecycle),
                observers: ObserverList::default(),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Bind the log source and resolve the effective container
    pub fn init(&self, source: Arc<dyn LogSource>) -> Result<()> {
        let opts = &self.shared.options;
        if opts.capacity == 0 {
            return Err(LogError::InvalidCapacity);
        }
        let path = ResourcePath::parse(&opts.path)
            .ok_or_else(|| LogError::InvalidPath(opts.path.clone()))?;

        let mut lc = self.shared.lifecycle.lock();
        lc.source = Some(source);
        lc.path = Some(path);
        lc.resolved_container = opts.resolved_container().to_string();
        lc.container = lc.resolved_container.clone();
        debug!(path = %opts.path, container = %lc.container, "log session initialized");
        Ok(())
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    pub fn path(&self) -> &str {
        &self.shared.options.path
    }

    /// Container currently tailed; empty means all containers
    pub fn container(&self) -> String {
        self.shared.lifecycle.lock().container.clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lifecycle.lock().state
    }

    pub fn is_paused(&self) -> bool {
        self.shared.inner.lock().paused
    }

    /// Number of buffered lines
    pub fn len(&self) -> usize {
        self.shared.inner.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active filter expression, if any
    pub fn filter_expression(&self) -> Option<String> {
        self.shared
            .inner
            .lock()
            .filter
            .as_ref()
            .map(|f| f.expression().to_string())
    }

    pub fn add_observer(&self, observer: &Arc<dyn LogObserver>) {
        self.shared.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn LogObserver>) {
        self.shared.observers.remove(observer);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Launch the background feed on the current tokio runtime.
    ///
    /// A previous run is stopped first. The feed ends when `cancel` fires,
    /// `stop` is called, or the source ends the stream.
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        // Old run is swapped out under the same lock that installs the new one
        let previous = {
            let mut lc = self.shared.lifecycle.lock();
            let (Some(source), Some(path)) = (lc.source.clone(), lc.path.clone()) else {
                return Err(LogError::NotInitialized);
            };
            let request = LogRequest {
                path,
                container: (!lc.container.is_empty()).then(|| lc.container.clone()),
                tail_lines: Some(self.shared.options.capacity as i64),
                since_seconds: lc.since_seconds,
                previous: self.shared.options.previous,
                timestamps: true,
                follow: true,
            };

            let previous = lc.run.take();
            if let Some(run) = &previous {
                run.shutdown();
            }

            lc.generation += 1;
            let generation = lc.generation;
            let run_cancel = cancel.child_token();
            let terminated = Arc::new(AtomicBool::new(false));

            debug!(path = %request.path, container = ?request.container, generation, "starting log feed");
            let task = tokio::spawn(self.clone().feed(
                source,
                request,
                run_cancel.clone(),
                cancel.clone(),
                Arc::clone(&terminated),
                generation,
            ));

            lc.run = Some(Run {
                generation,
                cancel: run_cancel,
                terminated,
                task,
            });
            lc.state = SessionState::Running;
            previous
        };

        if let Some(run) = previous {
            debug!(generation = run.generation, "replaced log feed");
            self.terminate(&run.terminated, run.generation, Termination::Stopped);
        }
        Ok(())
    }

    /// Stop the background feed; a no-op when nothing is running
    pub fn stop(&self) {
        let run = {
            let mut lc = self.shared.lifecycle.lock();
            let run = lc.run.take();
            if run.is_some() {
                lc.state = SessionState::Stopped;
            }
            run
        };
        let Some(run) = run else {
            return;
        };

        debug!(generation = run.generation, "stopping log feed");
        run.shutdown();
        self.terminate(&run.terminated, run.generation, Termination::Stopped);
    }

    /// Stop, drop buffered lines, signal resume and start again
    pub fn restart(&self, cancel: &CancellationToken) -> Result<()> {
        self.stop();
        self.clear();
        self.fire(|o| o.on_resumed());
        self.start(cancel)
    }

    /// Swap between all containers ("") and the resolved container.
    ///
    /// Returns true when all containers are now selected. Takes effect on
    /// the next `start`/`restart`.
    pub fn toggle_all_containers(&self) -> bool {
        let mut lc = self.shared.lifecycle.lock();
        if lc.container.is_empty() {
            lc.container = lc.resolved_container.clone();
        } else {
            lc.container.clear();
        }
        lc.container.is_empty()
    }

    /// Change the history window used by the next `start`/`restart`
    pub fn set_since_seconds(&self, since_seconds: Option<i64>) {
        self.shared.lifecycle.lock().since_seconds = since_seconds;
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Buffer one line. Observers hear about it on the next flush.
    pub fn append(&self, line: impl Into<ArcLogLine>) {
        let mut inner = self.shared.inner.lock();
        inner.buffer.add(line);
        inner.dirty = true;
    }

    /// Replace the whole buffer and reset observers
    pub fn set<I>(&self, lines: I)
    where
        I: IntoIterator,
        I::Item: Into<ArcLogLine>,
    {
        {
            let mut inner = self.shared.inner.lock();
            inner.buffer.replace_all(lines);
            inner.dirty = false;
        }
        self.deliver(Delivery::Reset);
    }

    /// Push the current view to observers
    pub fn notify(&self) {
        self.deliver(Delivery::Notify);
    }

    /// Empty the buffer and tell observers to clear
    pub fn clear(&self) {
        let _guard = self.shared.delivery.lock();
        {
            let mut inner = self.shared.inner.lock();
            inner.buffer.clear();
            inner.dirty = false;
        }
        self.fire(|o| o.on_clear());
    }

    /// Clear then resend the full current view
    pub fn refresh(&self) {
        self.deliver(Delivery::Reset);
    }

    /// Install a filter expression (blank removes the filter).
    ///
    /// A malformed expression leaves the current filter in place and is
    /// reported through `on_failed`.
    pub fn filter(&self, expr: &str) -> Result<()> {
        let spec = match FilterSpec::parse(expr, self.shared.options.case_insensitive) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(%err, "rejected filter expression");
                self.fire(|o| o.on_failed(&err));
                return Err(err);
            }
        };

        self.shared.inner.lock().filter = spec;
        self.deliver(Delivery::Reset);
        Ok(())
    }

    /// Remove the filter and resend the unfiltered view
    pub fn clear_filter(&self) {
        self.shared.inner.lock().filter = None;
        self.deliver(Delivery::Reset);
    }

    /// Hold tick-driven flushes; lines keep buffering
    pub fn pause(&self) {
        self.shared.inner.lock().paused = true;
        self.fire(|o| o.on_paused());
    }

    /// Let the next tick flush again
    pub fn resume(&self) {
        self.shared.inner.lock().paused = false;
        self.fire(|o| o.on_resumed());
    }

    /// Flip timestamp rendering and resend the view
    pub fn toggle_timestamps(&self) -> bool {
        let show = {
            let mut inner = self.shared.inner.lock();
            inner.show_timestamps = !inner.show_timestamps;
            inner.show_timestamps
        };
        self.deliver(Delivery::Reset);
        show
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn deliver(&self, kind: Delivery) {
        let _guard = self.shared.delivery.lock();

        let (snapshot, filter, show_timestamps) = {
            let mut inner = self.shared.inner.lock();
            if kind == Delivery::FlushIfDirty && (!inner.dirty || inner.paused) {
                return;
            }
            inner.dirty = false;
            (inner.buffer.snapshot(), inner.filter.clone(), inner.show_timestamps)
        };

        let lines = filter::apply(filter.as_ref(), &snapshot, show_timestamps);
        let clear = kind == Delivery::Reset || filter.is_some();
        if clear {
            self.fire(|o| o.on_clear());
        }
        self.fire(|o| o.on_data_batch(&lines));
    }

    fn fire(&self, f: impl Fn(&dyn LogObserver)) {
        let _guard = self.shared.delivery.lock();
        self.shared.observers.for_each(f);
    }

    /// Deliver the termination signal for a run, at most once
    fn terminate(&self, terminated: &AtomicBool, generation: u64, cause: Termination) {
        {
            let mut lc = self.shared.lifecycle.lock();
            if lc.run.as_ref().is_some_and(|r| r.generation == generation) {
                lc.run = None;
                lc.state = SessionState::Stopped;
            }
        }

        let _guard = self.shared.delivery.lock();
        if terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.deliver(Delivery::FlushIfDirty);
        debug!(generation, %cause, "log feed terminated");
        self.fire(|o| o.on_terminated(&cause));
    }

    /// Flush on tick unless this run already reported termination
    fn tick(&self, terminated: &AtomicBool) {
        let _guard = self.shared.delivery.lock();
        if terminated.load(Ordering::SeqCst) {
            return;
        }
        self.deliver(Delivery::FlushIfDirty);
    }

    async fn feed(
        self,
        source: Arc<dyn LogSource>,
        request: LogRequest,
        cancel: CancellationToken,
        parent: CancellationToken,
        terminated: Arc<AtomicBool>,
        generation: u64,
    ) {
        let cause = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,

            opened = source.open(request) => match opened {
                Ok(stream) => self.pump(stream, &cancel, &terminated).await,
                Err(err) => {
                    warn!(%err, "failed to open log stream");
                    Some(Termination::Failed(err.to_string()))
                }
            },
        };

        let cause = cause.unwrap_or_else(|| {
            if parent.is_cancelled() {
                Termination::Canceled
            } else {
                Termination::Stopped
            }
        });
        self.terminate(&terminated, generation, cause);
    }

    /// Forward lines and flush on every tick. `None` means canceled.
    async fn pump(
        &self,
        mut stream: LineStream,
        cancel: &CancellationToken,
        terminated: &AtomicBool,
    ) -> Option<Termination> {
        let period = self.shared.options.notification_interval.max(MIN_NOTIFICATION_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return None,

                _ = ticker.tick() => self.tick(terminated),

                next = stream.next() => match next {
                    Some(Ok(line)) => self.append(line),
                    Some(Err(err)) => {
                        warn!(%err, "log stream broke");
                        return Some(Termination::Failed(err.to_string()));
                    }
                    None => return Some(Termination::Ended),
                },
            }
        }
    }
}
