use std::collections::VecDeque;

pub const LISTEN_FEED_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct ListenFeed<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> Default for ListenFeed<T> {
    fn default() -> Self {
        Self::new(LISTEN_FEED_CAPACITY)
    }
}

impl<T> ListenFeed<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "listen feed capacity must be greater than 0");
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{ListenFeed, LISTEN_FEED_CAPACITY};

    #[test]
    fn newest_entry_comes_first() {
        let mut feed = ListenFeed::new(5);
        feed.push("m1");
        feed.push("m2");
        feed.push("m3");

        assert_eq!(feed.iter().copied().collect::<Vec<_>>(), vec!["m3", "m2", "m1"]);
    }

    #[test]
    fn sixty_entries_keep_the_last_fifty() {
        let mut feed = ListenFeed::default();
        for index in 1..=60 {
            feed.push(index);
        }

        assert_eq!(feed.len(), LISTEN_FEED_CAPACITY);
        assert_eq!(feed.iter().next(), Some(&60));
        assert_eq!(feed.iter().last(), Some(&11));
        assert!(feed.iter().zip(feed.iter().skip(1)).all(|(a, b)| a > b));
    }

    #[test]
    fn clear_empties_the_feed() {
        let mut feed = ListenFeed::new(2);
        feed.push('a');
        feed.push('b');
        feed.clear();

        assert!(feed.is_empty());
        feed.push('c');
        assert_eq!(feed.len(), 1);
    }
}
