//! Identity registry.
//!
//! Maps `"{Type}-{serialized pk}"` to the one live instance holding that
//! identity. Registering a second instance under an occupied key replaces the
//! mapping.

use crate::types::EntityToken;
use crate::value::PrimaryKey;
use std::collections::HashMap;

/// Builds the registry key of an identity.
#[must_use]
pub fn identity_key(entity_name: &str, pk: &PrimaryKey) -> String {
    format!("{entity_name}-{}", pk.serialize())
}

/// The identity map of a unit of work.
#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    by_key: HashMap<String, EntityToken>,
    by_token: HashMap<EntityToken, String>,
    order: Vec<String>,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` under an identity, replacing any previous holder.
    ///
    /// Returns the previously registered token if it differs.
    pub fn store(
        &mut self,
        entity_name: &str,
        pk: &PrimaryKey,
        token: EntityToken,
    ) -> Option<EntityToken> {
        let key = identity_key(entity_name, pk);
        if let Some(old_key) = self.by_token.get(&token) {
            if *old_key != key {
                let old_key = old_key.clone();
                self.remove_key(&old_key);
            }
        }
        let previous = self.by_key.insert(key.clone(), token);
        if let Some(prev) = previous.filter(|p| *p != token) {
            self.by_token.remove(&prev);
        } else if previous.is_none() {
            self.order.push(key.clone());
        }
        self.by_token.insert(token, key);
        previous.filter(|p| *p != token)
    }

    /// Looks up an identity.
    #[must_use]
    pub fn get(&self, entity_name: &str, pk: &PrimaryKey) -> Option<EntityToken> {
        self.by_key.get(&identity_key(entity_name, pk)).copied()
    }

    /// Looks up a raw registry key.
    #[must_use]
    pub fn get_by_key(&self, key: &str) -> Option<EntityToken> {
        self.by_key.get(key).copied()
    }

    /// Returns true if `token` is registered under any identity.
    #[must_use]
    pub fn contains(&self, token: EntityToken) -> bool {
        self.by_token.contains_key(&token)
    }

    /// Returns the key `token` is registered under.
    #[must_use]
    pub fn key_of(&self, token: EntityToken) -> Option<&str> {
        self.by_token.get(&token).map(String::as_str)
    }

    /// Unregisters `token`. Returns true if it was registered.
    pub fn remove(&mut self, token: EntityToken) -> bool {
        match self.by_token.get(&token).cloned() {
            Some(key) => {
                self.remove_key(&key);
                true
            }
            None => false,
        }
    }

    fn remove_key(&mut self, key: &str) {
        if let Some(token) = self.by_key.remove(key) {
            self.by_token.remove(&token);
        }
        self.order.retain(|k| k != key);
    }

    /// Registered tokens in registration order.
    #[must_use]
    pub fn tokens(&self) -> Vec<EntityToken> {
        self.order
            .iter()
            .filter_map(|k| self.by_key.get(k).copied())
            .collect()
    }

    /// Iterates over `(key, token)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, EntityToken)> {
        self.order
            .iter()
            .filter_map(|k| self.by_key.get(k).map(|t| (k.as_str(), *t)))
    }

    /// Returns the number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Removes every identity.
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_token.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn t(n: u64) -> EntityToken {
        EntityToken::new(n)
    }

    #[test]
    fn key_format() {
        assert_eq!(identity_key("Book", &PrimaryKey::single(3)), "Book-3");
        let composite = PrimaryKey::composite(vec![Value::Integer(1), Value::from("en")]);
        assert_eq!(identity_key("Edition", &composite), "Edition-1~~~en");
    }

    #[test]
    fn last_writer_wins() {
        let mut map = IdentityMap::new();
        let pk = PrimaryKey::single(1);
        assert_eq!(map.store("Book", &pk, t(0)), None);
        assert_eq!(map.store("Book", &pk, t(0)), None);
        assert_eq!(map.store("Book", &pk, t(5)), Some(t(0)));

        assert_eq!(map.get("Book", &pk), Some(t(5)));
        assert!(!map.contains(t(0)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn rekeying_a_token_drops_the_old_key() {
        let mut map = IdentityMap::new();
        map.store("Book", &PrimaryKey::single(1), t(0));
        map.store("Book", &PrimaryKey::single(2), t(0));
        assert_eq!(map.get("Book", &PrimaryKey::single(1)), None);
        assert_eq!(map.key_of(t(0)), Some("Book-2"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let mut map = IdentityMap::new();
        map.store("Author", &PrimaryKey::single(1), t(0));
        map.store("Book", &PrimaryKey::single(1), t(1));
        assert_eq!(map.tokens(), vec![t(0), t(1)]);

        assert!(map.remove(t(0)));
        assert!(!map.remove(t(0)));
        assert_eq!(map.tokens(), vec![t(1)]);

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.get("Book", &PrimaryKey::single(1)), None);
    }
}
