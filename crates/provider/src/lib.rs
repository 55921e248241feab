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

//! Interfaces to the external collaborators of the bundler: the Ethereum
//! node and the on-chain AiMiddleware contract, plus the wire types of the
//! bundler-collector tracer.

mod error;
pub use error::{HandleOpsEstimateError, SimulateValidationError};

mod traits;
#[cfg(any(test, feature = "test-utils"))]
pub use traits::{MockAiMiddleware, MockNodeProvider};
pub use traits::{AiMiddleware, NodeProvider};

mod tracer;
pub use tracer::{AccessInfo, CallFrame, CollectorTrace, ContractSizeInfo, EntityCallInfo};

pub mod abi;

mod eth;
pub use eth::{connect, AiMiddlewareContract, EthNodeProvider};
