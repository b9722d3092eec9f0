//! Request-scoped context: a deadline, cancellation signals, and typed
//! values, passed to every load and on to the batch function.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{self, Poll, Waker},
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, Select, Sender};
use futures_timer::Delay;
use parking_lot::Mutex;
use thiserror::Error;

/// The ways a context can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation signal shared between a [`CancelHandle`] and every context
/// derived from it. Cancellation drops the sender, which disconnects `done`
/// and releases every blocked receiver at once.
struct CancelSignal {
    sender: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
    wakers: Mutex<Vec<Waker>>,
}

impl CancelSignal {
    fn new() -> Self {
        let (sender, done) = channel::bounded(0);

        Self {
            sender: Mutex::new(Some(sender)),
            done,
            wakers: Mutex::new(Vec::new()),
        }
    }

    fn is_canceled(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn cancel(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }

        let wakers = std::mem::take(&mut *self.wakers.lock());
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Register interest in this signal. Returns true if it has already
    /// fired, in which case the waker isn't stored.
    fn register(&self, waker: &Waker) -> bool {
        let mut wakers = self.wakers.lock();

        // Checked while holding the waker lock, so that a concurrent cancel
        // either sees our waker or we see its cancellation.
        if self.is_canceled() {
            return true;
        }

        if !wakers.iter().any(|existing| existing.will_wake(waker)) {
            wakers.push(waker.clone());
        }

        false
    }
}

/// Cancels the context returned alongside it by [`Context::with_cancel`],
/// along with every context derived from that one.
///
/// Dropping the handle does *not* cancel the context.
#[derive(Clone)]
pub struct CancelHandle {
    signal: Arc<CancelSignal>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.signal.cancel()
    }

    pub fn is_canceled(&self) -> bool {
        self.signal.is_canceled()
    }
}

impl Debug for CancelHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

type Values = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// A request context.
///
/// Contexts are immutable; every `with_*` method returns a derived child.
/// Children inherit the cancellation signals and values of their parent, and
/// their deadline is never later than the parent's. Cloning is cheap.
///
/// The loader never cancels a batch because one caller's context ended.
/// A context only controls how long *its* caller is willing to wait, plus
/// whatever the batch function chooses to do with the context it's given.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    signals: Vec<Arc<CancelSignal>>,
    values: Arc<Values>,
}

impl Context {
    /// An empty context: no deadline, never canceled, no values.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that ends at `deadline`, or at the parent's deadline
    /// if that is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };

        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Derive a context that ends `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that can be canceled with the returned handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let signal = Arc::new(CancelSignal::new());
        let mut ctx = self.clone();
        ctx.signals.push(Arc::clone(&signal));

        (ctx, CancelHandle { signal })
    }

    /// Derive a context carrying `value`. Values are keyed by type; a child
    /// value shadows a parent value of the same type.
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut values = Values::clone(&self.values);
        values.insert(TypeId::of::<T>(), Arc::new(value));

        Self {
            values: Arc::new(values),
            ..self.clone()
        }
    }

    /// Look up a value of type `T`.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    /// A context with this context's values, but none of its deadline or
    /// cancellation. Use it for work that must outlive the caller that
    /// started it while still carrying its trace data.
    pub fn detached(&self) -> Self {
        Self {
            deadline: None,
            signals: Vec::new(),
            values: Arc::clone(&self.values),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why this context has ended, if it has. Cancellation takes precedence
    /// over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.signals.iter().any(|signal| signal.is_canceled()) {
            Some(ContextError::Canceled)
        } else {
            match self.deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    Some(ContextError::DeadlineExceeded)
                }
                _ => None,
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Block until `ready` yields or disconnects, or until this context ends,
    /// whichever happens first.
    pub(crate) fn wait_on<T>(&self, ready: &Receiver<T>) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let mut select = Select::new();
        let ready_index = select.recv(ready);
        for signal in &self.signals {
            select.recv(&signal.done);
        }

        let operation = match self.deadline {
            Some(deadline) => select
                .select_deadline(deadline)
                .map_err(|_| ContextError::DeadlineExceeded)?,
            None => select.select(),
        };

        let index = operation.index();
        if index == ready_index {
            // Either a message or a disconnect; both mean the slot settled.
            let _ = operation.recv(ready);
            Ok(())
        } else {
            let _ = operation.recv(&self.signals[index - 1].done);
            Err(ContextError::Canceled)
        }
    }

    /// Async counterpart of `wait_on`'s context half. `timer` is owned by the
    /// polling future so the deadline delay survives between polls.
    pub(crate) fn poll_done(
        &self,
        cx: &mut task::Context<'_>,
        timer: &mut Option<Delay>,
    ) -> Poll<ContextError> {
        if self
            .signals
            .iter()
            .any(|signal| signal.register(cx.waker()))
        {
            return Poll::Ready(ContextError::Canceled);
        }

        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                return Poll::Ready(ContextError::DeadlineExceeded);
            }

            let delay = timer.get_or_insert_with(|| Delay::new(deadline - now));
            if Pin::new(delay).poll(cx).is_ready() {
                return Poll::Ready(ContextError::DeadlineExceeded);
            }
        }

        Poll::Pending
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("signals", &self.signals.len())
            .field("values", &self.values.len())
            .field("err", &self.err())
            .finish()
    }
}
