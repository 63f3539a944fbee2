//! Registration and alias ownership store.
//!
//! The authoritative state behind the server core plugin: who is
//! registered with what metadata, and which identity owns which alias.
//! Nothing here ever deletes a record; registrations and alias records
//! are permanent once created.

use crate::error::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;

/// Ownership state of one alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    /// Identity currently owning the alias.
    pub owner: String,
    /// Token proving the right to re-claim without a forceful demand.
    pub token: String,
}

/// Metadata of one registered client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Caller-supplied metadata, last write wins.
    pub metadata: HashMap<String, String>,
}

/// Authoritative registration and alias-ownership state, safe for
/// concurrent use by many handler invocations.
pub trait RegistryStore: Send + Sync {
    /// Upsert the registration for `identity`. Blank identities are
    /// rejected.
    fn save_registration(&self, identity: &str, metadata: HashMap<String, String>) -> Result<()>;

    /// Metadata stored for `identity`, if registered.
    fn get_registration(&self, identity: &str) -> Option<RegistrationRecord>;

    /// Non-forceful ownership check. **Mutates on first contact**: an
    /// unowned alias is atomically claimed for `candidate` with `token`
    /// and the call reports granted. An owned alias is granted only when
    /// the stored token matches (no mutation). Empty tokens and blank
    /// candidates are rejected.
    fn check_ownership(&self, alias: &str, token: &str, candidate: &str) -> Result<bool>;

    /// Forceful takeover: unconditionally replaces the record and returns
    /// the identity that owned the alias immediately before, if any.
    fn take_ownership(&self, alias: &str, token: &str, candidate: &str) -> Result<Option<String>>;

    /// Current owner of `alias`, if any.
    fn get_alias_owner(&self, alias: &str) -> Option<String>;
}

fn validate(token: &str, candidate: &str) -> Result<()> {
    if token.is_empty() {
        return Err(Error::InvalidInput("ownership token must not be empty".into()));
    }
    if candidate.trim().is_empty() {
        return Err(Error::InvalidInput("candidate identity must not be blank".into()));
    }
    Ok(())
}

/// In-memory reference store.
#[derive(Default)]
pub struct MemoryStore {
    registrations: DashMap<String, RegistrationRecord>,
    aliases: DashMap<String, AliasRecord>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered identities.
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Number of claimed aliases.
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

impl RegistryStore for MemoryStore {
    fn save_registration(&self, identity: &str, metadata: HashMap<String, String>) -> Result<()> {
        if identity.trim().is_empty() {
            return Err(Error::InvalidInput("identity must not be blank".into()));
        }
        self.registrations
            .insert(identity.to_string(), RegistrationRecord { metadata });
        Ok(())
    }

    fn get_registration(&self, identity: &str) -> Option<RegistrationRecord> {
        self.registrations.get(identity).map(|r| r.clone())
    }

    fn check_ownership(&self, alias: &str, token: &str, candidate: &str) -> Result<bool> {
        validate(token, candidate)?;
        // The entry API makes claim-if-absent atomic with respect to
        // concurrent checks and takeovers of the same alias.
        match self.aliases.entry(alias.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(AliasRecord {
                    owner: candidate.to_string(),
                    token: token.to_string(),
                });
                Ok(true)
            }
            Entry::Occupied(occupied) => Ok(occupied.get().token == token),
        }
    }

    fn take_ownership(&self, alias: &str, token: &str, candidate: &str) -> Result<Option<String>> {
        validate(token, candidate)?;
        let previous = self.aliases.insert(
            alias.to_string(),
            AliasRecord {
                owner: candidate.to_string(),
                token: token.to_string(),
            },
        );
        Ok(previous.map(|record| record.owner))
    }

    fn get_alias_owner(&self, alias: &str) -> Option<String> {
        self.aliases.get(alias).map(|record| record.owner.clone())
    }
}
