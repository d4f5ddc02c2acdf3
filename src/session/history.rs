use std::collections::VecDeque;

/// Bounded ring of recently played titles, newest last.
#[derive(Debug, Clone)]
pub struct RecentTitles {
    titles: VecDeque<String>,
    capacity: usize,
}

impl RecentTitles {
    pub fn new(capacity: usize) -> Self {
        Self {
            titles: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, title: &str) {
        if self.titles.len() == self.capacity {
            self.titles.pop_front();
        }
        self.titles.push_back(title.to_owned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.titles.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}
