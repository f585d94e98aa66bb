use std::slice;

use serde::Serialize;

/// Ordered publish/subscribe targets, in the order they were given on the
/// command line. Every entry shares the run's configured QoS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TopicList(Vec<String>);

impl TopicList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, topic: impl Into<String>) {
        self.0.push(topic.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// publish target; publishers always use the first entry
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for TopicList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a TopicList {
    type Item = &'a String;
    type IntoIter = slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::TopicList;

    #[test]
    fn preserves_insertion_order() {
        let mut topics = TopicList::new();
        topics.push("c/d");
        topics.push("a/b");
        topics.push("c/d");

        assert_eq!(topics.len(), 3);
        assert_eq!(topics.first(), Some("c/d"));
        let collected = topics.iter().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(collected, ["c/d", "a/b", "c/d"]);
    }

    #[test]
    fn empty_list_has_no_first() {
        let topics = TopicList::new();
        assert!(topics.is_empty());
        assert_eq!(topics.first(), None);
    }
}
