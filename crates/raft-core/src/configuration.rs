//! # configuration
//!
//! why: describe cluster membership carried by configuration-change entries
//! relations: encoded into EntryType::Change entries by raft-log's append_configuration
//! what: Role enum, Server, Configuration with membership edits and json encoding

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Role a server plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Replicates the log and takes part in elections and quorums
    Voter,
    /// Replicates the log but does not vote
    Standby,
    /// Does not replicate the log and does not vote
    Spare,
}

impl Default for Role {
    fn default() -> Self {
        Self::Voter
    }
}

/// A single member of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub address: String,
    pub role: Role,
}

/// Cluster membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub servers: Vec<Server>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server. Ids must be non-zero, ids and addresses unique.
    pub fn add(
        &mut self,
        id: u64,
        address: impl Into<String>,
        role: Role,
    ) -> Result<(), ConfigurationError> {
        let address = address.into();
        if id == 0 {
            return Err(ConfigurationError::ZeroId);
        }
        if self.index_of(id).is_some() {
            return Err(ConfigurationError::DuplicateId(id));
        }
        if self.servers.iter().any(|s| s.address == address) {
            return Err(ConfigurationError::DuplicateAddress(address));
        }
        self.servers.push(Server { id, address, role });
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: u64) -> Option<usize> {
        self.servers.iter().position(|s| s.id == id)
    }

    pub fn remove(&mut self, id: u64) -> Result<Server, ConfigurationError> {
        let i = self.index_of(id).ok_or(ConfigurationError::NotFound(id))?;
        Ok(self.servers.remove(i))
    }

    pub fn voter_count(&self) -> usize {
        self.servers.iter().filter(|s| s.role == Role::Voter).count()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Encode into the payload of a configuration-change entry
    pub fn encode(&self) -> Result<Bytes, ConfigurationError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode the payload of a configuration-change entry
    pub fn decode(buf: &[u8]) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_slice(buf)?)
    }
}
