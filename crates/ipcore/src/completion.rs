use alloc::rc::Rc;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub u64);

struct Slot<T> {
    value: Option<T>,
    done: bool,
    waker: Option<Waker>,
}

// engine side of a token; the first completion wins, later ones are dropped
pub(crate) struct Completion<T>(Rc<RefCell<Slot<T>>>);

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Completion(self.0.clone())
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Completion(Rc::new(RefCell::new(Slot {
            value: None,
            done: false,
            waker: None,
        })))
    }

    pub fn token(&self, id: TokenId) -> Token<T> {
        Token {
            id,
            slot: self.0.clone(),
        }
    }

    pub fn complete(&self, value: T) -> bool {
        let waker = {
            let mut slot = self.0.borrow_mut();
            if slot.done {
                return false;
            }
            slot.done = true;
            slot.value = Some(value);
            slot.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

/// Handle on an asynchronous upper-layer request.
///
/// Resolved exactly once by the engine, with success, an error, `Aborted`
/// or `Timeout`. Await it, or poll with [`Token::try_take`] when driving the
/// engine by hand.
pub struct Token<T> {
    id: TokenId,
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Token<T> {
    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn is_done(&self) -> bool {
        self.slot.borrow().done
    }

    pub fn try_take(&self) -> Option<T> {
        self.slot.borrow_mut().value.take()
    }
}

impl<T> Future for Token<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.slot.borrow_mut();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
