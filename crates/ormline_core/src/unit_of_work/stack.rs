//! Insertion-ordered token sets used as pending-operation stacks.

use crate::types::EntityToken;
use std::collections::{HashSet, VecDeque};

/// A set of entity tokens that iterates in insertion order.
#[derive(Debug, Default, Clone)]
pub(crate) struct TokenStack {
    order: VecDeque<EntityToken>,
    members: HashSet<EntityToken>,
}

impl TokenStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a token at the end. Returns false if it was already present.
    pub(crate) fn insert(&mut self, token: EntityToken) -> bool {
        if !self.members.insert(token) {
            return false;
        }
        self.order.push_back(token);
        true
    }

    /// Removes a token. Returns false if it was not present.
    pub(crate) fn remove(&mut self, token: EntityToken) -> bool {
        if !self.members.remove(&token) {
            return false;
        }
        self.order.retain(|t| *t != token);
        true
    }

    pub(crate) fn contains(&self, token: EntityToken) -> bool {
        self.members.contains(&token)
    }

    /// The oldest token still present.
    pub(crate) fn first(&self) -> Option<EntityToken> {
        self.order.front().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Copies the current contents so the stack can be mutated while walking them.
    pub(crate) fn to_vec(&self) -> Vec<EntityToken> {
        self.order.iter().copied().collect()
    }

    /// Removes and returns every token in insertion order.
    pub(crate) fn drain(&mut self) -> Vec<EntityToken> {
        self.members.clear();
        self.order.drain(..).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u64) -> EntityToken {
        EntityToken::new(n)
    }

    #[test]
    fn keeps_insertion_order_without_duplicates() {
        let mut stack = TokenStack::new();
        assert!(stack.insert(t(3)));
        assert!(stack.insert(t(1)));
        assert!(!stack.insert(t(3)));
        assert!(stack.insert(t(2)));
        assert_eq!(stack.to_vec(), vec![t(3), t(1), t(2)]);
        assert_eq!(stack.first(), Some(t(3)));

        assert!(stack.remove(t(1)));
        assert!(!stack.remove(t(1)));
        assert_eq!(stack.len(), 2);
        assert!(!stack.contains(t(1)));

        assert_eq!(stack.drain(), vec![t(3), t(2)]);
        assert!(stack.is_empty());
        assert!(stack.insert(t(3)));
    }
}
