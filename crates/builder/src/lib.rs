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

//! Egress half of the bundler: the batch pipeline turning mempool contents
//! into an on-chain `handleOps` submission, the two submission strategies,
//! and the ticker loop driving everything.

mod context;
pub use context::{BatchCtx, BatchHandler, PendingRemoval};

mod error;
pub use error::SubmitError;

mod stages;
pub use stages::{
    CodeHashes, DropExpired, FilterUnderpriced, IncOpsIncluded, MaintainGasLimit,
    PaymasterDeposit, SimulateBatch, SortByGasPrice, SortByNonce,
};

mod transaction;
pub use transaction::{build_handle_ops_tx, estimate_and_trim, wait_for_receipt, TxParams};

mod relayer;
pub use relayer::Relayer;

mod searcher;
pub use searcher::{projected_base_fee, BundleSender, HttpBundleSender, Searcher};

mod bundler;
pub use bundler::{Bundler, MiddlewarePipeline};
