/// FIFO buffer with amortised O(1) enqueue and dequeue.
///
/// Dequeued slots are left empty behind a head index and reclaimed in bulk
/// once they make up a large share of the backing vector.
#[derive(Debug, Clone)]
pub struct Queue<T> {
    items: Vec<Option<T>>,
    head: usize,
}

/// Below this many slots compaction is never worth it.
const COMPACT_MIN_LEN: usize = 50;

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            head: 0,
        }
    }

    pub fn enqueue(&mut self, item: T) {
        self.items.push(Some(item));
    }

    /// Remove and return the oldest item.
    pub fn dequeue(&mut self) -> Option<T> {
        let item = self.items.get_mut(self.head)?.take();
        self.head += 1;
        if self.head == self.items.len() {
            self.items.clear();
            self.head = 0;
        } else if self.items.len() > COMPACT_MIN_LEN && self.head * 4 > self.items.len() {
            self.items.drain(..self.head);
            self.head = 0;
        }
        item
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.get(self.head).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the items matching `keep`, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.drain(..self.head);
        self.head = 0;
        self.items
            .retain(|slot| slot.as_ref().map(&mut keep).unwrap_or(false));
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items[self.head..].iter().filter_map(Option::as_ref)
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeues_in_insertion_order() {
        let mut q = Queue::new();
        q.enqueue("s1");
        q.enqueue("s2");
        q.enqueue("s3");

        assert_eq!(q.len(), 3);
        assert_eq!(q.peek(), Some(&"s1"));
        assert_eq!(q.dequeue(), Some("s1"));
        assert_eq!(q.dequeue(), Some("s2"));
        assert_eq!(q.dequeue(), Some("s3"));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn interleaved_use_survives_compaction() {
        let mut q = Queue::new();
        let mut expected = 0;
        for i in 0..1000 {
            q.enqueue(i);
            if i % 3 == 0 {
                assert_eq!(q.dequeue(), Some(expected));
                expected += 1;
            }
        }
        assert_eq!(q.len(), 1000 - expected);
        assert!(q.items.len() < 1000, "backing storage never compacted");
        while let Some(v) = q.dequeue() {
            assert_eq!(v, expected);
            expected += 1;
        }
        assert_eq!(expected, 1000);
    }

    #[test]
    fn retain_keeps_order() {
        let mut q = Queue::new();
        for i in 1..=6 {
            q.enqueue(i);
        }
        q.dequeue();
        q.retain(|v| v % 2 == 0);
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn empty_queue() {
        let mut q: Queue<u8> = Queue::default();
        assert!(q.peek().is_none());
        assert!(q.dequeue().is_none());
        assert_eq!(q.iter().count(), 0);
    }
}
