//! Delegated authority.
//!
//! Who may act for whom is decided outside the engine. The engine only asks
//! one question of a resolver: on whose behalf can this user act?

use crate::error::Result;
use crate::types::UserId;
use std::collections::HashMap;

pub trait DelegationResolver {
    /// The principal whose steps `user` may act on, if any.
    fn resolve_delegate(&self, user: &UserId) -> Option<UserId>;
}

/// Nobody acts for anybody else.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelegation;

impl DelegationResolver for NoDelegation {
    fn resolve_delegate(&self, _user: &UserId) -> Option<UserId> {
        None
    }
}

/// Fixed delegate → principal table, usually loaded from config.
#[derive(Debug, Clone, Default)]
pub struct DelegationTable {
    principals: HashMap<UserId, UserId>,
}

impl DelegationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, delegate: UserId, principal: UserId) {
        self.principals.insert(delegate, principal);
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut table = Self::new();
        for (delegate, principal) in map {
            table.insert(UserId::parse(delegate)?, UserId::parse(principal)?);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

impl DelegationResolver for DelegationTable {
    fn resolve_delegate(&self, user: &UserId) -> Option<UserId> {
        self.principals.get(user).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_resolves_principal() {
        let mut map = HashMap::new();
        map.insert("deputy@example.gov".to_string(), "chief@example.gov".to_string());
        let table = DelegationTable::from_map(&map).unwrap();

        let deputy = UserId::parse("deputy@example.gov").unwrap();
        let chief = UserId::parse("chief@example.gov").unwrap();
        assert_eq!(table.resolve_delegate(&deputy), Some(chief.clone()));
        assert_eq!(table.resolve_delegate(&chief), None);
        assert_eq!(NoDelegation.resolve_delegate(&deputy), None);
    }

    #[test]
    fn table_rejects_bad_ids() {
        let mut map = HashMap::new();
        map.insert("not valid".to_string(), "chief".to_string());
        assert!(DelegationTable::from_map(&map).is_err());
    }
}
