//! Ordered Queue
//!
//! A binary min-heap with buffered insertion. Behaviors tend to be activated
//! in bursts while a single resource update fans out, so pushes only append
//! to a staging buffer; the buffer is merged into the heap the next time the
//! queue is popped or peeked.
//!
//! Keys are not stored. Each pop or peek takes a key function, which lets the
//! graph key behaviors by their current topological order. When orders change
//! the graph calls [`OrderedQueue::unsort`], flattening the heap back into the
//! buffer so every item is re-keyed on the next merge.

/// Priority queue popping the item with the smallest key first.
#[derive(Debug, Clone)]
pub struct OrderedQueue<T> {
    heap: Vec<T>,
    buffer: Vec<T>,
}

impl<T> OrderedQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Stage an item. O(1); heap maintenance is deferred.
    pub fn push(&mut self, item: T) {
        self.buffer.push(item);
    }

    /// Remove and return the item with the smallest key.
    pub fn pop_by<K, F>(&mut self, key: F) -> Option<T>
    where
        K: Ord,
        F: Fn(&T) -> K,
    {
        self.merge(&key);
        if self.heap.is_empty() {
            return None;
        }
        let item = self.heap.swap_remove(0);
        self.sift_down(0, &key);
        Some(item)
    }

    /// Return the item with the smallest key without removing it.
    pub fn peek_by<K, F>(&mut self, key: F) -> Option<&T>
    where
        K: Ord,
        F: Fn(&T) -> K,
    {
        self.merge(&key);
        self.heap.first()
    }

    /// Flatten the heap back into the staging buffer.
    ///
    /// Called after keys change; the heap is rebuilt lazily on the next pop.
    pub fn unsort(&mut self) {
        self.buffer.append(&mut self.heap);
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.buffer.clear();
    }

    /// Number of queued items, staged or heaped.
    pub fn len(&self) -> usize {
        self.heap.len() + self.buffer.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty() && self.buffer.is_empty()
    }

    fn merge<K: Ord>(&mut self, key: &impl Fn(&T) -> K) {
        if self.buffer.is_empty() {
            return;
        }
        self.heap.reserve(self.buffer.len());
        for item in std::mem::take(&mut self.buffer) {
            self.heap.push(item);
            self.sift_up(self.heap.len() - 1, key);
        }
    }

    fn sift_up<K: Ord>(&mut self, mut index: usize, key: &impl Fn(&T) -> K) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if key(&self.heap[index]) >= key(&self.heap[parent]) {
                break;
            }
            self.heap.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down<K: Ord>(&mut self, mut index: usize, key: &impl Fn(&T) -> K) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && key(&self.heap[left]) < key(&self.heap[smallest]) {
                smallest = left;
            }
            if right < len && key(&self.heap[right]) < key(&self.heap[smallest]) {
                smallest = right;
            }
            if smallest == index {
                return;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }
}

impl<T> Default for OrderedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
