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

use std::path::PathBuf;

use clap::Parser;
use ethers::types::Address;
use url::Url;

/// Runtime configuration, populated from flags or `AIOPS_BUNDLER_*`
/// environment variables.
#[derive(Clone, Debug, Parser)]
#[command(name = "aiops-bundler", about = "An ERC-4337-style bundler for aiOps")]
pub struct Config {
    /// HTTP URL of the Ethereum node
    #[arg(long, env = "AIOPS_BUNDLER_ETH_CLIENT_URL")]
    pub eth_client_url: String,

    /// Hex private key of the submitting EOA
    #[arg(long, env = "AIOPS_BUNDLER_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Port the JSON-RPC server listens on
    #[arg(long, env = "AIOPS_BUNDLER_PORT", default_value_t = 4337)]
    pub port: u16,

    /// Directory holding persistent bundler state
    #[arg(
        long,
        env = "AIOPS_BUNDLER_DATA_DIRECTORY",
        default_value = "/tmp/aiops_bundler"
    )]
    pub data_directory: PathBuf,

    /// AiMiddleware contract addresses to serve, comma separated
    #[arg(
        long,
        env = "AIOPS_BUNDLER_SUPPORTED_AI_MIDDLEWARE",
        value_delimiter = ','
    )]
    pub supported_ai_middlewares: Vec<Address>,

    /// Recipient of handleOps gas refunds; defaults to the EOA address
    #[arg(long, env = "AIOPS_BUNDLER_BENEFICIARY")]
    pub beneficiary: Option<Address>,

    /// Name of the node-side bundler-collector tracer
    #[arg(
        long,
        env = "AIOPS_BUNDLER_NATIVE_BUNDLER_COLLECTOR_TRACER",
        default_value = "bundlerCollectorTracer"
    )]
    pub native_bundler_collector_tracer: String,

    /// Cap on an op's verificationGasLimit
    #[arg(
        long,
        env = "AIOPS_BUNDLER_MAX_VERIFICATION_GAS",
        default_value_t = 6_000_000
    )]
    pub max_verification_gas: u64,

    /// Cap on the total gas of one batch
    #[arg(
        long,
        env = "AIOPS_BUNDLER_MAX_BATCH_GAS_LIMIT",
        default_value_t = 18_000_000
    )]
    pub max_batch_gas_limit: u64,

    /// Seconds an op may wait in the mempool before expiring
    #[arg(long, env = "AIOPS_BUNDLER_MAX_OP_TTL_SECONDS", default_value_t = 180)]
    pub max_op_ttl_seconds: u64,

    /// How many past blocks inclusion lookups may scan
    #[arg(long, env = "AIOPS_BUNDLER_OP_LOOKUP_LIMIT", default_value_t = 2_000)]
    pub op_lookup_limit: u64,

    /// Max ops per bundle; zero means unlimited
    #[arg(long, env = "AIOPS_BUNDLER_MAX_BATCH", default_value_t = 0)]
    pub max_batch: usize,

    /// Block-builder eth_sendBundle endpoints; presence switches the
    /// submitter into searcher mode
    #[arg(long, env = "AIOPS_BUNDLER_ETH_BUILDER_URLS", value_delimiter = ',')]
    pub eth_builder_urls: Vec<Url>,

    /// How many future blocks a searcher bundle targets
    #[arg(long, env = "AIOPS_BUNDLER_BLOCKS_IN_THE_FUTURE", default_value_t = 6)]
    pub blocks_in_the_future: u64,

    /// Minimum stake, in wei, for an entity to count as staked
    #[arg(long, env = "AIOPS_BUNDLER_MIN_STAKE_VALUE", default_value_t = 0)]
    pub min_stake_value: u64,

    /// Minimum unstake delay, in seconds, for an entity to count as staked
    #[arg(long, env = "AIOPS_BUNDLER_MIN_UNSTAKE_DELAY", default_value_t = 0)]
    pub min_unstake_delay: u64,

    /// Whether the RIP-7212 precompile may be called during validation
    #[arg(
        long,
        env = "AIOPS_BUNDLER_IS_RIP7212_SUPPORTED",
        default_value_t = false
    )]
    pub is_rip7212_supported: bool,

    /// IPFS gateway resolving alt-mempool definitions
    #[arg(long, env = "AIOPS_BUNDLER_ALT_MEMPOOL_IPFS_GATEWAY")]
    pub alt_mempool_ipfs_gateway: Option<Url>,

    /// Alt-mempool ids this bundler participates in, comma separated
    #[arg(long, env = "AIOPS_BUNDLER_ALT_MEMPOOL_IDS", value_delimiter = ',')]
    pub alt_mempool_ids: Vec<String>,

    /// Expose the debug_bundler_ namespace
    #[arg(long, env = "AIOPS_BUNDLER_DEBUG_MODE", default_value_t = false)]
    pub debug_mode: bool,
}
