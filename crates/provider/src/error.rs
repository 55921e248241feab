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

use aiops_types::FailedOp;

/// Outcome of `simulateValidation` other than a recovered validation result.
#[derive(Debug, thiserror::Error)]
pub enum SimulateValidationError {
    /// The middleware rejected the operation with a typed reason
    #[error(transparent)]
    FailedOp(FailedOp),
    /// The call reverted with something other than the expected envelopes
    #[error("unexpected revert from simulateValidation: {0}")]
    UnexpectedRevert(String),
    /// Transport or decoding failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of estimating gas for a `handleOps` call.
#[derive(Debug, thiserror::Error)]
pub enum HandleOpsEstimateError {
    /// An operation in the batch reverted validation; it should be dropped
    /// and the estimate retried
    #[error(transparent)]
    FailedOp(FailedOp),
    /// Transport failure or an undecodable revert
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
