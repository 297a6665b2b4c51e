use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::error::MapError;

type Poller<T> = Box<dyn FnMut() -> Option<Result<T, MapError>> + Send + Sync>;

enum State<T> {
    Pending(Poller<T>),
    Done(Result<T, MapError>),
    Taken,
}

/// A value that becomes available later, polled from the tick thread.
///
/// Producers on other threads complete it through an [`AsyncSender`]; the engine
/// never blocks on it.
pub struct Async<T> {
    state: State<T>,
}

impl<T: Send + Sync + 'static> Async<T> {
    pub fn ready(value: T) -> Self {
        Self {
            state: State::Done(Ok(value)),
        }
    }

    pub fn failed(err: MapError) -> Self {
        Self {
            state: State::Done(Err(err)),
        }
    }

    pub fn from_result(result: Result<T, MapError>) -> Self {
        Self {
            state: State::Done(result),
        }
    }

    pub fn from_poller(
        poller: impl FnMut() -> Option<Result<T, MapError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: State::Pending(Box::new(poller)),
        }
    }

    /// A pending value and the sender that completes it.
    pub fn channel() -> (AsyncSender<T>, Async<T>) {
        let (tx, rx): (Sender<Result<T, MapError>>, Receiver<Result<T, MapError>>) = bounded(1);
        let receiver = Async::from_poller(move || match rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(MapError::Task(
                "async producer dropped without a result".to_string(),
            ))),
        });
        (AsyncSender(tx), receiver)
    }

    /// Returns the result once it is available, and only once.
    pub fn poll(&mut self) -> Option<Result<T, MapError>> {
        if let State::Pending(poller) = &mut self.state {
            match poller() {
                Some(result) => self.state = State::Done(result),
                None => return None,
            }
        }
        match std::mem::replace(&mut self.state, State::Taken) {
            State::Done(result) => Some(result),
            other => {
                self.state = other;
                None
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending(_))
    }

    pub fn map<U: Send + Sync + 'static>(
        self,
        f: impl FnOnce(T) -> U + Send + Sync + 'static,
    ) -> Async<U> {
        self.and_then(move |value| Ok(f(value)))
    }

    pub fn and_then<U: Send + Sync + 'static>(
        mut self,
        f: impl FnOnce(T) -> Result<U, MapError> + Send + Sync + 'static,
    ) -> Async<U> {
        let mut f = Some(f);
        Async::from_poller(move || {
            let result = self.poll()?;
            let f = f.take()?;
            Some(result.and_then(f))
        })
    }

    /// Calls `f` with the result when it gets polled, then passes the result on.
    pub fn on_result(
        mut self,
        f: impl FnOnce(&Result<T, MapError>) + Send + Sync + 'static,
    ) -> Async<T> {
        let mut f = Some(f);
        Async::from_poller(move || {
            let result = self.poll()?;
            if let Some(f) = f.take() {
                f(&result);
            }
            Some(result)
        })
    }
}

pub struct AsyncSender<T>(Sender<Result<T, MapError>>);

impl<T> AsyncSender<T> {
    pub fn send(self, result: Result<T, MapError>) {
        if self.0.send(result).is_err() {
            bevy::log::debug!("Async receiver dropped before the result arrived");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn ready_value_is_taken_once() {
        let mut value = Async::ready(4).map(|v| v * 2);
        assert_eq!(value.poll().unwrap().unwrap(), 8);
        assert!(value.poll().is_none());
    }

    #[test]
    fn channel_completes_from_another_thread() {
        let (tx, mut rx) = Async::<String>::channel();
        assert!(rx.poll().is_none());
        thread::spawn(move || tx.send(Ok("tile".to_string())))
            .join()
            .unwrap();
        assert_eq!(rx.poll().unwrap().unwrap(), "tile");
    }

    #[test]
    fn dropped_sender_fails_the_value() {
        let (tx, mut rx) = Async::<u8>::channel();
        drop(tx);
        assert!(matches!(rx.poll(), Some(Err(MapError::Task(_)))));
    }

    #[test]
    fn on_result_sees_failures() {
        let seen = Arc::new(AtomicBool::new(false));
        let flag = seen.clone();
        let mut value = Async::<u8>::failed(MapError::fetch("1/0/0", "offline"))
            .on_result(move |r| flag.store(r.is_err(), Ordering::SeqCst));
        assert!(value.poll().unwrap().is_err());
        assert!(seen.load(Ordering::SeqCst));
    }
}
