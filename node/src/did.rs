// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! DID parsing against an immutable method table.
//!
//! The table is built once at startup (defaults plus configured networks) and
//! shared by reference. Nothing registers methods after that point.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::DidError;

pub const METHOD_IDEN3: &str = "iden3";
pub const METHOD_POLYGON_ID: &str = "polygonid";
pub const METHOD_OPTIMISM_ID: &str = "opid";

pub const METHOD_BYTE_IDEN3: u8 = 0b0000_0001;
pub const METHOD_BYTE_POLYGON_ID: u8 = 0b0000_0010;
pub const METHOD_BYTE_OPTIMISM_ID: u8 = 0b0100_0011;

/// `did:<method>:<blockchain>:<network>:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did {
    method: String,
    blockchain: String,
    network: String,
    id: String,
}

impl Did {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn blockchain(&self) -> &str {
        &self.blockchain
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for Did {
    type Err = DidError;

    /// Syntax only. Use [`DidMethodTable::parse`] to also check registration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 5 || parts[0] != "did" {
            return Err(DidError::Malformed(s.to_string()));
        }
        if parts[1..].iter().any(|p| p.is_empty()) {
            return Err(DidError::Malformed(s.to_string()));
        }
        if !parts[4].chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DidError::Malformed(s.to_string()));
        }
        Ok(Did {
            method: parts[1].to_string(),
            blockchain: parts[2].to_string(),
            network: parts[3].to_string(),
            id: parts[4].to_string(),
        })
    }
}

impl TryFrom<String> for Did {
    type Error = DidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.to_string()
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}:{}:{}", self.method, self.blockchain, self.network, self.id)
    }
}

/// One `(blockchain, network)` pair accepted under a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidNetworkParams {
    pub blockchain: String,
    pub network: String,
    pub network_flag: u8,
    pub chain_id: u64,
}

impl DidNetworkParams {
    pub fn new(blockchain: &str, network: &str, network_flag: u8, chain_id: u64) -> Self {
        Self {
            blockchain: blockchain.to_string(),
            network: network.to_string(),
            network_flag,
            chain_id,
        }
    }
}

#[derive(Debug, Clone)]
struct MethodEntry {
    byte: u8,
    networks: BTreeMap<(String, String), DidNetworkParams>,
}

#[derive(Debug, Clone, Default)]
pub struct DidMethodTable {
    methods: BTreeMap<String, MethodEntry>,
}

impl DidMethodTable {
    pub fn builder() -> DidMethodTableBuilder {
        DidMethodTableBuilder::default()
    }

    /// Built-in methods and networks plus extra `opid` networks from config.
    pub fn with_defaults(custom_opid: &[DidNetworkParams]) -> Result<Self, DidError> {
        let mut builder = Self::builder()
            .method(METHOD_IDEN3, METHOD_BYTE_IDEN3)
            .method(METHOD_POLYGON_ID, METHOD_BYTE_POLYGON_ID)
            .method(METHOD_OPTIMISM_ID, METHOD_BYTE_OPTIMISM_ID);

        for method in [METHOD_IDEN3, METHOD_POLYGON_ID] {
            builder = builder
                .network(method, DidNetworkParams::new("polygon", "main", 0b0001_0001, 137))
                .network(method, DidNetworkParams::new("polygon", "amoy", 0b0001_0011, 80002))
                .network(method, DidNetworkParams::new("eth", "main", 0b0010_0001, 1))
                .network(method, DidNetworkParams::new("eth", "sepolia", 0b0010_0011, 11_155_111));
        }
        builder = builder
            .network(METHOD_OPTIMISM_ID, DidNetworkParams::new("optimism", "main", 0b1000_0001, 10))
            .network(METHOD_OPTIMISM_ID, DidNetworkParams::new("optimism", "sepolia", 0b1000_0011, 11_155_420));

        for params in custom_opid {
            builder = builder.network(METHOD_OPTIMISM_ID, params.clone());
        }
        builder.build()
    }

    /// Parse and check that method and network are registered.
    pub fn parse(&self, s: &str) -> Result<Did, DidError> {
        let did: Did = s.parse()?;
        self.check(&did)?;
        Ok(did)
    }

    pub fn check(&self, did: &Did) -> Result<(), DidError> {
        self.network(did).map(|_| ())
    }

    pub fn method_byte(&self, method: &str) -> Option<u8> {
        self.methods.get(method).map(|m| m.byte)
    }

    pub fn network(&self, did: &Did) -> Result<&DidNetworkParams, DidError> {
        let entry = self
            .methods
            .get(did.method())
            .ok_or_else(|| DidError::UnknownMethod(did.method().to_string()))?;
        entry
            .networks
            .get(&(did.blockchain().to_string(), did.network().to_string()))
            .ok_or_else(|| DidError::UnknownNetwork {
                method: did.method().to_string(),
                blockchain: did.blockchain().to_string(),
                network: did.network().to_string(),
            })
    }
}

/// Collects registrations; errors surface from [`DidMethodTableBuilder::build`].
#[derive(Debug, Default)]
pub struct DidMethodTableBuilder {
    methods: Vec<(String, u8)>,
    networks: Vec<(String, DidNetworkParams)>,
}

impl DidMethodTableBuilder {
    pub fn method(mut self, name: &str, byte: u8) -> Self {
        self.methods.push((name.to_string(), byte));
        self
    }

    pub fn network(mut self, method: &str, params: DidNetworkParams) -> Self {
        self.networks.push((method.to_string(), params));
        self
    }

    pub fn build(self) -> Result<DidMethodTable, DidError> {
        let mut methods: BTreeMap<String, MethodEntry> = BTreeMap::new();
        for (name, byte) in self.methods {
            if methods.contains_key(&name) || methods.values().any(|m| m.byte == byte) {
                return Err(DidError::DuplicateMethod(name));
            }
            methods.insert(name, MethodEntry { byte, networks: BTreeMap::new() });
        }

        for (method, params) in self.networks {
            let entry = methods
                .get_mut(&method)
                .ok_or_else(|| DidError::UnknownMethod(method.clone()))?;
            let label = format!("{}:{}:{}", method, params.blockchain, params.network);
            let key = (params.blockchain.clone(), params.network.clone());
            let clash = entry.networks.contains_key(&key)
                || entry
                    .networks
                    .values()
                    .any(|n| n.chain_id == params.chain_id || n.network_flag == params.network_flag);
            if clash {
                return Err(DidError::DuplicateNetwork(label));
            }
            entry.networks.insert(key, params);
        }

        Ok(DidMethodTable { methods })
    }
}
