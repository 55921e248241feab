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

use ethers::types::H256;

/// Submission failures. These abort the current tick; everything still in
/// the mempool is retried on the next one.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The transaction mined with a failed status
    #[error("transaction {0:?} failed on-chain")]
    TransactionFailed(H256),
    /// No receipt appeared within the wait timeout
    #[error("timed out waiting for inclusion of transaction {0:?}")]
    InclusionTimeout(H256),
    /// Every (builder x block) bundle broadcast errored
    #[error("all builder broadcasts failed: {0}")]
    FlashbotsBroadcastBundle(String),
    /// Transport or signing failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
