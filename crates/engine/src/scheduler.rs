use std::collections::VecDeque;

/// FIFO wait queue for sessions blocked behind the global active-upload
/// cap, with priority pinning and explicit reordering.
///
/// Pinned entries always sit ahead of normal entries; within each group
/// arrival order is preserved.
#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: VecDeque<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    token: String,
    pinned: bool,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a session at the tail of its priority group.
    pub fn enqueue(&mut self, token: impl Into<String>, pinned: bool) {
        let token = token.into();
        if self.position(&token).is_some() {
            return;
        }
        let entry = QueueEntry { token, pinned };
        if pinned {
            let insert_at = self.entries.iter().take_while(|e| e.pinned).count();
            self.entries.insert(insert_at, entry);
        } else {
            self.entries.push_back(entry);
        }
    }

    /// Removes and returns the head of the queue.
    pub fn pop_next(&mut self) -> Option<String> {
        self.entries.pop_front().map(|e| e.token)
    }

    /// Removes a session wherever it sits. Returns `true` if it was queued.
    pub fn remove(&mut self, token: &str) -> bool {
        match self.position(token) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Promotes a session ahead of all normal-priority entries.
    pub fn pin(&mut self, token: &str) {
        if let Some(idx) = self.position(token) {
            let mut entry = self.entries.remove(idx).unwrap();
            entry.pinned = true;
            let insert_at = self.entries.iter().take_while(|e| e.pinned).count();
            self.entries.insert(insert_at, entry);
        }
    }

    /// Demotes a session back to normal priority (tail of the queue).
    pub fn unpin(&mut self, token: &str) {
        if let Some(idx) = self.position(token) {
            let mut entry = self.entries.remove(idx).unwrap();
            entry.pinned = false;
            self.entries.push_back(entry);
        }
    }

    /// Moves a session to `new_index`, clamped to the queue bounds.
    pub fn reorder(&mut self, token: &str, new_index: usize) {
        if let Some(idx) = self.position(token) {
            let entry = self.entries.remove(idx).unwrap();
            let clamped = new_index.min(self.entries.len());
            self.entries.insert(clamped, entry);
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.position(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current ordering, head first.
    pub fn tokens(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.token.clone()).collect()
    }

    fn position(&self, token: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = WaitQueue::new();
        q.enqueue("a", false);
        q.enqueue("b", false);
        q.enqueue("c", false);
        assert_eq!(q.pop_next().as_deref(), Some("a"));
        assert_eq!(q.pop_next().as_deref(), Some("b"));
        assert_eq!(q.pop_next().as_deref(), Some("c"));
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn duplicate_enqueue_ignored() {
        let mut q = WaitQueue::new();
        q.enqueue("a", false);
        q.enqueue("a", false);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn pinned_entries_jump_normal_ones() {
        let mut q = WaitQueue::new();
        q.enqueue("a", false);
        q.enqueue("b", false);
        q.enqueue("p", true);
        assert_eq!(q.tokens(), vec!["p", "a", "b"]);
    }

    #[test]
    fn pinned_entries_keep_arrival_order() {
        let mut q = WaitQueue::new();
        q.enqueue("p1", true);
        q.enqueue("a", false);
        q.enqueue("p2", true);
        assert_eq!(q.tokens(), vec!["p1", "p2", "a"]);
    }

    #[test]
    fn pin_promotes_existing_entry() {
        let mut q = WaitQueue::new();
        q.enqueue("a", false);
        q.enqueue("b", false);
        q.enqueue("c", false);
        q.pin("c");
        assert_eq!(q.tokens(), vec!["c", "a", "b"]);

        q.unpin("c");
        assert_eq!(q.tokens(), vec!["a", "b", "c"]);
    }

    #[test]
    fn reorder_moves_and_clamps() {
        let mut q = WaitQueue::new();
        q.enqueue("a", false);
        q.enqueue("b", false);
        q.enqueue("c", false);
        q.reorder("c", 0);
        assert_eq!(q.tokens(), vec!["c", "a", "b"]);
        q.reorder("c", 99);
        assert_eq!(q.tokens(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut q = WaitQueue::new();
        q.enqueue("a", false);
        assert!(!q.remove("zzz"));
        assert!(q.remove("a"));
        assert!(q.is_empty());
    }
}
