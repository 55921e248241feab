// This file is part of Aiops Bundler.
//
// Aiops Bundler is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Aiops Bundler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Aiops Bundler.
// If not, see https://www.gnu.org/licenses/.

use std::{fmt::Display, str::FromStr};

use anyhow::bail;
use ethers::{types::Address, utils::to_checksum};
use parse_display::Display;
use serde::{Deserialize, Serialize};

/// The role an address fills in an aiOp.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[display(style = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// The sender account
    Account,
    /// The factory deploying the sender
    Factory,
    /// The paymaster sponsoring gas
    Paymaster,
}

impl EntityType {
    /// String form used in log and error messages.
    pub fn to_str(&self) -> &'static str {
        match self {
            EntityType::Account => "account",
            EntityType::Factory => "factory",
            EntityType::Paymaster => "paymaster",
        }
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(EntityType::Account),
            "factory" => Ok(EntityType::Factory),
            "paymaster" => Ok(EntityType::Paymaster),
            _ => bail!("Invalid entity type: {s}"),
        }
    }
}

/// An entity named by an aiOp.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Entity {
    /// The role the address fills
    pub kind: EntityType,
    /// The address of the entity
    pub address: Address,
}

impl Entity {
    /// Create a new entity of the given role and address.
    pub fn new(kind: EntityType, address: Address) -> Self {
        Self { kind, address }
    }

    /// Create a new account entity at address.
    pub fn account(address: Address) -> Self {
        Self::new(EntityType::Account, address)
    }

    /// Create a new factory entity at address.
    pub fn factory(address: Address) -> Self {
        Self::new(EntityType::Factory, address)
    }

    /// Create a new paymaster entity at address.
    pub fn paymaster(address: Address) -> Self {
        Self::new(EntityType::Paymaster, address)
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, to_checksum(&self.address, None))
    }
}
