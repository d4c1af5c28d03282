//! Mutable crawl state owned by a single crawler run.

use std::collections::{HashSet, VecDeque};

use url::Url;

/// Queue + visited-set for one crawl: FIFO traversal (breadth-first, so
/// shallow pages win), duplicate suppression for both the queue and the
/// discovered PDF set. Discarded when the run ends.
#[derive(Debug, Default)]
pub struct Frontier {
    visited: HashSet<String>,
    queued: HashSet<String>,
    queue: VecDeque<Url>,
    pdf_seen: HashSet<String>,
    pdf_links: Vec<Url>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a URL unless it was already visited or queued. Returns
    /// whether the URL was accepted.
    pub fn enqueue(&mut self, url: Url) -> bool {
        let key = url.as_str().to_string();
        if self.visited.contains(&key) || !self.queued.insert(key) {
            return false;
        }
        self.queue.push_back(url);
        true
    }

    /// Pops the next URL in FIFO order.
    pub fn pop(&mut self) -> Option<Url> {
        self.queue.pop_front()
    }

    /// Marks a URL as visited. Returns `false` when it was already
    /// visited, in which case the caller skips the fetch.
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(url.as_str().to_string())
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.visited.contains(url.as_str())
    }

    /// Records a discovered PDF link, deduplicated by exact URL.
    pub fn add_pdf(&mut self, url: Url) {
        if self.pdf_seen.insert(url.as_str().to_string()) {
            self.pdf_links.push(url);
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn pdf_count(&self) -> usize {
        self.pdf_links.len()
    }

    /// Consumes the frontier, yielding the discovered PDF links in first
    /// discovery order.
    pub fn into_pdf_links(self) -> Vec<Url> {
        self.pdf_links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://site.test{path}")).unwrap()
    }

    #[test]
    fn fifo_order() {
        let mut frontier = Frontier::new();
        assert!(frontier.enqueue(url("/a")));
        assert!(frontier.enqueue(url("/b")));
        assert_eq!(frontier.pop(), Some(url("/a")));
        assert_eq!(frontier.pop(), Some(url("/b")));
        assert_eq!(frontier.pop(), None);
    }

    #[test]
    fn duplicates_rejected_in_queue() {
        let mut frontier = Frontier::new();
        assert!(frontier.enqueue(url("/a")));
        assert!(!frontier.enqueue(url("/a")));
        assert_eq!(frontier.pending(), 1);
    }

    #[test]
    fn visited_urls_never_requeued() {
        let mut frontier = Frontier::new();
        frontier.enqueue(url("/a"));
        let popped = frontier.pop().unwrap();
        assert!(frontier.mark_visited(&popped));
        assert!(!frontier.mark_visited(&popped));
        // Re-discovered through another link path.
        assert!(!frontier.enqueue(url("/a")));
        assert_eq!(frontier.pending(), 0);
    }

    #[test]
    fn pdf_links_deduplicate_preserving_order() {
        let mut frontier = Frontier::new();
        frontier.add_pdf(url("/one.pdf"));
        frontier.add_pdf(url("/two.pdf"));
        frontier.add_pdf(url("/one.pdf"));
        assert_eq!(frontier.pdf_count(), 2);
        assert_eq!(
            frontier.into_pdf_links(),
            vec![url("/one.pdf"), url("/two.pdf")]
        );
    }
}
