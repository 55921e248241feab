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

use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityType};

/// An ERC-4337-style pseudo-transaction targeting an AiMiddleware contract.
///
/// The canonical JSON form uses hex-quantity encoding for all numeric fields
/// and hex strings for byte fields (see the `ethers` serde impls).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AiOperation {
    /// Account making the operation
    pub sender: Address,
    /// Anti-replay nonce
    pub nonce: U256,
    /// Factory address and calldata used to deploy the sender, empty if the
    /// sender already exists
    pub init_code: Bytes,
    /// Calldata executed on the sender during the execution phase
    pub call_data: Bytes,
    /// Gas available for the execution phase
    pub call_gas_limit: U256,
    /// Gas available for the validation phase
    pub verification_gas_limit: U256,
    /// Gas paid to the bundler for calldata and overhead not metered on-chain
    pub pre_verification_gas: U256,
    /// EIP-1559 max fee per gas
    pub max_fee_per_gas: U256,
    /// EIP-1559 max priority fee per gas
    pub max_priority_fee_per_gas: U256,
    /// Paymaster address and extra context, empty if the sender pays
    pub paymaster_and_data: Bytes,
    /// Signature over the operation hash
    pub signature: Bytes,
}

/// Unique identifier of an operation within one middleware's mempool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AiOpId {
    /// Sender of the operation
    pub sender: Address,
    /// Nonce of the operation
    pub nonce: U256,
}

impl AiOperation {
    /// Identifier of this operation: (sender, nonce).
    pub fn id(&self) -> AiOpId {
        AiOpId {
            sender: self.sender,
            nonce: self.nonce,
        }
    }

    /// The factory deploying the sender, taken from the first 20 bytes of
    /// `init_code`, if present.
    pub fn factory(&self) -> Option<Address> {
        Self::address_from_field(&self.init_code)
    }

    /// The paymaster sponsoring this operation, taken from the first 20 bytes
    /// of `paymaster_and_data`, if present.
    pub fn paymaster(&self) -> Option<Address> {
        Self::address_from_field(&self.paymaster_and_data)
    }

    /// All entities named by this operation, sender first.
    pub fn entities(&self) -> Vec<Entity> {
        let mut out = vec![Entity::new(EntityType::Account, self.sender)];
        if let Some(factory) = self.factory() {
            out.push(Entity::new(EntityType::Factory, factory));
        }
        if let Some(paymaster) = self.paymaster() {
            out.push(Entity::new(EntityType::Paymaster, paymaster));
        }
        out
    }

    /// Maximum gas the middleware may consume on behalf of this operation.
    ///
    /// The verification limit counts three times when a paymaster is present
    /// to cover its validation and postOp calls.
    pub fn max_gas_available(&self) -> U256 {
        let mul = if self.paymaster().is_some() { 3 } else { 1 };
        self.call_gas_limit + self.verification_gas_limit * mul + self.pre_verification_gas
    }

    /// Maximum wei the payer may be charged for this operation.
    pub fn max_prefund(&self) -> U256 {
        self.max_gas_available() * self.max_fee_per_gas
    }

    /// The gas price this operation would effectively pay against the given
    /// base fee. Without a base fee (pre-EIP-1559 networks) the fee cap is
    /// used as-is.
    pub fn effective_gas_price(&self, base_fee: Option<U256>) -> U256 {
        match base_fee {
            Some(bf) => self.max_fee_per_gas.min(self.max_priority_fee_per_gas + bf),
            None => self.max_fee_per_gas,
        }
    }

    /// Canonical ABI packing of the operation: the eleven fields in order,
    /// dynamic byte fields encoded with offset, length, and right-padded data.
    pub fn pack(&self) -> Bytes {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::Bytes(self.init_code.to_vec()),
            Token::Bytes(self.call_data.to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::Bytes(self.paymaster_and_data.to_vec()),
            Token::Bytes(self.signature.to_vec()),
        ])
        .into()
    }

    /// Hash identifying this operation under the given middleware and chain.
    ///
    /// `keccak256(pack(op) || abi(middleware) || abi(chain_id))`; stable
    /// across restarts and implementations.
    pub fn op_hash(&self, middleware: Address, chain_id: u64) -> H256 {
        let mut data = self.pack().to_vec();
        data.extend(encode(&[
            Token::Address(middleware),
            Token::Uint(chain_id.into()),
        ]));
        keccak256(data).into()
    }

    fn address_from_field(data: &Bytes) -> Option<Address> {
        if data.len() < 20 {
            None
        } else {
            Some(Address::from_slice(&data[..20]))
        }
    }
}
