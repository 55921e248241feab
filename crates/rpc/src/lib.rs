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

//! JSON-RPC surface: the `eth_` aiOp namespace and the `debug_bundler_`
//! test hooks.

mod error;
pub use error::EthRpcError;

mod types;
pub use types::{RpcAiOperationByHash, RpcAiOperationReceipt, RpcGasEstimate};

mod api;
pub use api::{EthApi, EthApiServer, EthApiSettings};

mod debug;
pub use debug::{DebugApi, DebugApiServer};

mod task;
pub use task::serve;
