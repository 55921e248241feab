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

//! Ingress validation pipeline for aiOps and the gas overhead model.
//!
//! Validation is a fixed sequence of handlers over a shared [`IngressCtx`];
//! the pool composes the canonical order at startup and runs every inbound
//! operation through it.

mod context;
pub use context::{EntityState, IngressCtx};

mod pipeline;
pub use pipeline::{IngressHandler, IngressPipeline};

mod violations;
pub use violations::{CheckViolation, SimulationViolation, ValidationError};

mod checks;
pub use checks::{CheckSettings, ReputationRules, StructuralChecks};

mod simulate;
pub use simulate::{SimulateOp, SnapshotCodeHashes};

mod trace;
pub use trace::{TraceSettings, TraceValidate};

mod altmempool;
pub use altmempool::{AltMempool, Directory, StorageException};

pub mod gas;
pub use gas::{CalcPvgFn, Overhead};
