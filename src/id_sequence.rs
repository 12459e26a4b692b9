use std::ops::{AddAssign, Sub};

/// Hands out increasing ids starting at `first`.
#[derive(Debug)]
pub(crate) struct IdSequence<T> {
    first: T,
    next: T,
}

impl<T: Copy + AddAssign<T> + Sub<Output = T> + PartialEq<T> + From<u8>> IdSequence<T> {
    pub(crate) fn new(first: T) -> Self {
        Self { first, next: first }
    }

    /// The last id handed out, if any.
    pub(crate) fn current(&self) -> Option<T> {
        if self.next == self.first {
            None
        } else {
            Some(self.next - T::from(1))
        }
    }

    pub(crate) fn next(&mut self) -> T {
        let id = self.next;
        self.next += T::from(1);
        id
    }
}
