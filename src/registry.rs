//! Immutable registry mapping event names to topic hashes and back.

use std::{collections::HashMap, sync::Arc};

use alloy::primitives::{B256, keccak256};
use thiserror::Error;

use crate::events::{DecodeFn, EventDefinition, EventGroup};

/// A registered event.
///
/// `hash` is `keccak256(signature)`, the value every matching log carries as its first topic.
#[derive(Clone, Debug)]
pub struct EventSignature {
    pub group: EventGroup,
    pub name: &'static str,
    pub signature: &'static str,
    pub hash: B256,
    pub(crate) decode: DecodeFn,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Event {name} is registered with two different signatures: {first} and {second}")]
    NameCollision { name: &'static str, first: &'static str, second: &'static str },
    #[error("Malformed event signature: {0}")]
    MalformedSignature(&'static str),
}

/// Bijective map between event names and topic hashes for one watched event set.
///
/// Built once at startup and shared through an [`Arc`]; nothing mutates it afterwards. The same
/// definition registered twice (for example by two groups that both watch a migration event) is
/// accepted; a name bound to two different signatures is not.
#[derive(Debug)]
pub struct EventRegistry {
    groups: Vec<EventGroup>,
    by_hash: HashMap<B256, EventSignature>,
    by_name: HashMap<&'static str, B256>,
    // topic0 values in registration order
    topics: Vec<B256>,
}

impl EventRegistry {
    /// Registry of every event in `groups`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if two groups bind the same name to different signatures.
    pub fn for_groups(groups: &[EventGroup]) -> Result<Arc<Self>, RegistryError> {
        let mut unique = groups.to_vec();
        unique.sort_unstable();
        unique.dedup();
        let definitions = unique.iter().flat_map(|group| group.definitions());
        Self::from_definitions(definitions).map(Arc::new)
    }

    /// Registry over an explicit list of definitions.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if a signature has no parameter list or if a name is bound to
    /// two different signatures.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = EventDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self {
            groups: Vec::new(),
            by_hash: HashMap::new(),
            by_name: HashMap::new(),
            topics: Vec::new(),
        };

        for definition in definitions {
            let name = definition
                .signature
                .split_once('(')
                .map(|(name, _)| name)
                .filter(|name| !name.is_empty())
                .ok_or(RegistryError::MalformedSignature(definition.signature))?;
            let hash = keccak256(definition.signature.as_bytes());

            if let Some(existing) = registry.by_name.get(name) {
                if *existing == hash {
                    continue;
                }
                return Err(RegistryError::NameCollision {
                    name,
                    first: registry.by_hash[existing].signature,
                    second: definition.signature,
                });
            }

            if !registry.groups.contains(&definition.group) {
                registry.groups.push(definition.group);
            }
            registry.by_name.insert(name, hash);
            registry.topics.push(hash);
            registry.by_hash.insert(
                hash,
                EventSignature {
                    group: definition.group,
                    name,
                    signature: definition.signature,
                    hash,
                    decode: definition.decode,
                },
            );
        }

        debug!(events = registry.topics.len(), groups = ?registry.groups, "Event registry built");

        Ok(registry)
    }

    #[must_use]
    pub fn by_hash(&self, hash: &B256) -> Option<&EventSignature> {
        self.by_hash.get(hash)
    }

    #[must_use]
    pub fn hash_of(&self, name: &str) -> Option<B256> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn name_of(&self, hash: &B256) -> Option<&'static str> {
        self.by_hash.get(hash).map(|sig| sig.name)
    }

    #[must_use]
    pub fn contains(&self, hash: &B256) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Topic0 values of every registered event, in registration order.
    #[must_use]
    pub fn topics(&self) -> &[B256] {
        &self.topics
    }

    #[must_use]
    pub fn groups(&self) -> &[EventGroup] {
        &self.groups
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
