/// Returned by [`Buffer::add`] when the buffer is at capacity. Carries the
/// rejected item back to the caller.
#[derive(Debug, thiserror::Error)]
#[error("buffer is full")]
pub struct BufferFull<T>(pub T);

/// Bounded accumulator of pending messages for one handler.
///
/// Not synchronized: the owning handler is the only writer and flushes it
/// itself.
#[derive(Debug)]
pub struct Buffer<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Buffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// # Errors
    ///
    /// Returns [`BufferFull`] with the item if the buffer is at capacity.
    pub fn add(&mut self, item: T) -> Result<(), BufferFull<T>> {
        if self.is_full() {
            return Err(BufferFull(item));
        }
        self.items.push(item);
        Ok(())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Discards the contents, keeping the capacity. Read them with
    /// [`get`](Self::get) or move them out with [`take`](Self::take) first.
    pub fn flush(&mut self) {
        self.items = Vec::with_capacity(self.capacity);
    }

    #[must_use]
    pub fn get(&self) -> &[T] {
        &self.items
    }

    /// Moves the contents out and leaves an empty buffer of the same
    /// capacity.
    pub fn take(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.capacity))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn fills_up_and_rejects() {
        let mut buffer = Buffer::new(3);
        for i in 0..3 {
            buffer.add(i).unwrap();
        }
        assert!(buffer.is_full());

        let err = buffer.add(4).unwrap_err();
        assert_eq!(err.to_string(), "buffer is full");
        assert_eq!(err.0, 4);
        assert_eq!(buffer.get(), &[0, 1, 2]);
    }

    #[test]
    fn flush_resets_to_empty_with_same_capacity() {
        let mut buffer = Buffer::new(3);
        buffer.add("a").unwrap();
        buffer.add("b").unwrap();

        buffer.flush();
        assert!(buffer.get().is_empty());
        assert_eq!(buffer.capacity(), 3);
        assert!(!buffer.is_full());
    }

    #[test]
    fn take_moves_contents_out() {
        let mut buffer = Buffer::new(2);
        buffer.add(1).unwrap();
        buffer.add(2).unwrap();

        assert_eq!(buffer.take(), vec![1, 2]);
        assert!(buffer.is_empty());
        buffer.add(3).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    proptest! {
        #[test]
        fn never_holds_more_than_capacity(capacity in 1usize..32, adds in 0usize..64) {
            let mut buffer = Buffer::new(capacity);
            let rejected = (0..adds).filter(|i| buffer.add(*i).is_err()).count();

            prop_assert_eq!(buffer.len(), adds.min(capacity));
            prop_assert_eq!(rejected, adds.saturating_sub(capacity));
            prop_assert_eq!(buffer.is_full(), adds >= capacity);
        }
    }
}
