use std::{collections::HashMap, default::Default, num::NonZeroUsize, task::Waker};

#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Token {
        Token(self.0)
    }
}

/// Data structure for managing a collection of wakers that are all waiting
/// on a single thunk slot.
///
/// Unlike a future that drives its own work, a thunk is resolved from the
/// dispatch thread, so there is no "driving" waker: every registered waker is
/// woken exactly once, when the slot settles.
///
/// Wakers can be added to a wakerset; when added, a token associated with the
/// Waker is returned. This token should be associated with a pending future
/// and can be used to:
/// - replace the waker on subsequent polls
/// - discard the waker from the wakerset when the future is dropped.
/// These tokens cannot be cloned or otherwise duplicated; this helps to ensure
/// that their lifespan are correctly associated with a particular future.
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,

    // Tokens are an ever-increasing integer. We assume that WakerSets are
    // relatively short-lived and that there's no chance of running out of
    // these.
    next_token: NonZeroUsize,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::new(),
            next_token: NonZeroUsize::MIN,
        }
    }
}

impl WakerSet {
    /// Add a new waker to this set. Return the token associated with this
    /// waker's entry in the set. When the future is re-polled, replace_waker
    /// should be used with this token.
    #[must_use]
    pub(crate) fn add_waker(&mut self, waker: Waker) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);

        self.wakers.insert(token.duplicate(), waker);
        token
    }

    /// Update the waker stored under an existing token. The waker is passed
    /// by reference and is set with clone_from because we assume that it
    /// comes from a Context and will need to be cloned anyway.
    ///
    /// If the token is unknown (the set was drained by a wake_all between
    /// polls) the waker is re-inserted under the same token.
    pub(crate) fn replace_waker(&mut self, token: &Token, waker: &Waker) {
        match self.wakers.get_mut(token) {
            Some(existing) => existing.clone_from(waker),
            None => {
                self.wakers.insert(token.duplicate(), waker.clone());
            }
        }
    }

    /// Discard a waker from this set. No-op if the token isn't present.
    pub(crate) fn discard_waker(&mut self, token: Token) {
        self.wakers.remove(&token);
    }

    pub(crate) fn len(&self) -> usize {
        self.wakers.len()
    }

    pub(crate) fn wake_all(self) {
        self.wakers
            .into_iter()
            .for_each(|(_token, waker)| waker.wake());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::task::Wake;

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn wake_all_wakes_each_registered_waker_once() {
        let first = Arc::new(CountingWaker::default());
        let second = Arc::new(CountingWaker::default());

        let mut set = WakerSet::default();
        let token = set.add_waker(Waker::from(first.clone()));
        let _other = set.add_waker(Waker::from(second.clone()));

        // Re-polling with a new waker replaces, rather than adds
        set.replace_waker(&token, &Waker::from(first.clone()));
        assert_eq!(set.len(), 2);

        set.wake_all();
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn discarded_wakers_are_not_woken() {
        let waker = Arc::new(CountingWaker::default());

        let mut set = WakerSet::default();
        let token = set.add_waker(Waker::from(waker.clone()));
        set.discard_waker(token);
        assert_eq!(set.len(), 0);

        set.wake_all();
        assert_eq!(waker.0.load(Ordering::SeqCst), 0);
    }
}
