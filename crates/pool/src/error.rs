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

use aiops_sim::ValidationError;
use ethers::types::U256;

/// Mempool admission failures.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// An op with the same (sender, nonce) is already pooled and the
    /// replacement does not raise both fees by the required 10%.
    #[error("replacement underpriced: maxPriorityFeePerGas must be at least {0} and maxFeePerGas at least {1}")]
    DuplicateUnderpriced(U256, U256),
    /// Store failure
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// Failure of one `add_op` request, spanning validation and admission.
#[derive(Debug, thiserror::Error)]
pub enum AddOpError {
    /// The ingress pipeline rejected the op
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The mempool refused the op
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    /// Anything else
    #[error(transparent)]
    Internal(anyhow::Error),
}
