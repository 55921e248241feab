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

mod config;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use aiops_builder::{
    BatchHandler, BundleSender, Bundler, CodeHashes, DropExpired, FilterUnderpriced,
    HttpBundleSender, IncOpsIncluded, MaintainGasLimit, MiddlewarePipeline, PaymasterDeposit,
    Relayer, Searcher, SimulateBatch, SortByGasPrice, SortByNonce,
};
use aiops_pool::{AiOpPool, Db, Mempool, PoolSettings, ReputationStore};
use aiops_provider::{connect, AiMiddlewareContract, EthNodeProvider, NodeProvider};
use aiops_rpc::{DebugApi, DebugApiServer, EthApi, EthApiServer, EthApiSettings};
use aiops_sim::{Directory, Overhead, TraceSettings};
use aiops_types::ReputationConstants;
use anyhow::Context;
use clap::Parser;
use config::Config;
use ethers::signers::{LocalWallet, Signer};
use jsonrpsee::RpcModule;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if config.supported_ai_middlewares.is_empty() {
        anyhow::bail!("at least one supported AiMiddleware address is required");
    }

    let raw_provider = connect(&config.eth_client_url)?;
    let provider = Arc::new(EthNodeProvider::new(raw_provider.clone()));
    let chain_id = provider.chain_id().await?;
    info!(chain_id, "connected to node");

    let wallet: LocalWallet = config
        .private_key
        .trim_start_matches("0x")
        .parse()
        .context("should parse private key")?;
    let wallet = wallet.with_chain_id(chain_id);
    let beneficiary = config.beneficiary.unwrap_or_else(|| wallet.address());

    let db = Arc::new(Db::open_at(&config.data_directory)?);
    let mempool = Mempool::new(db.clone());
    let constants = Arc::new(ReputationConstants {
        min_stake_value: config.min_stake_value.into(),
        min_unstake_delay: config.min_unstake_delay.into(),
        ..Default::default()
    });
    let reputation = ReputationStore::new(db, constants.clone());
    let overhead = Arc::new(Overhead::default());

    let directory = Arc::new(Directory::default());
    if !config.alt_mempool_ids.is_empty() {
        warn!(
            ids = ?config.alt_mempool_ids,
            "alt-mempool ids configured but no definitions resolved; storage exceptions stay off"
        );
    }

    let mut pools = Vec::new();
    let mut pipelines = Vec::new();
    for &middleware_address in &config.supported_ai_middlewares {
        let middleware = Arc::new(AiMiddlewareContract::new(
            raw_provider.clone(),
            middleware_address,
            config.native_bundler_collector_tracer.clone(),
        ));

        pools.push(Arc::new(AiOpPool::new(
            provider.clone(),
            middleware.clone(),
            mempool.clone(),
            reputation.clone(),
            overhead.clone(),
            chain_id,
            PoolSettings {
                max_verification_gas: config.max_verification_gas.into(),
                is_rip7212_supported: config.is_rip7212_supported,
                constants: constants.clone(),
                directory: directory.clone(),
            },
        )));

        let trace_settings = TraceSettings {
            is_rip7212_supported: config.is_rip7212_supported,
            constants: constants.clone(),
            directory: directory.clone(),
        };
        let mut handlers: Vec<Arc<dyn BatchHandler>> = vec![
            Arc::new(DropExpired::new(Duration::from_secs(
                config.max_op_ttl_seconds,
            ))),
            Arc::new(SortByGasPrice),
            Arc::new(FilterUnderpriced),
            Arc::new(SortByNonce),
            Arc::new(MaintainGasLimit::new(
                config.max_batch_gas_limit.into(),
                overhead.clone(),
            )),
            Arc::new(CodeHashes::new(provider.clone())),
            Arc::new(PaymasterDeposit::new(middleware.clone())),
            Arc::new(SimulateBatch::new(middleware.clone(), trace_settings)),
        ];
        if config.eth_builder_urls.is_empty() {
            handlers.push(Arc::new(Relayer::new(
                provider.clone(),
                middleware.clone(),
                wallet.clone(),
                beneficiary,
            )));
        } else {
            let builders: Vec<Arc<dyn BundleSender>> = config
                .eth_builder_urls
                .iter()
                .map(|url| Arc::new(HttpBundleSender::new(url.clone())) as Arc<dyn BundleSender>)
                .collect();
            handlers.push(Arc::new(Searcher::new(
                provider.clone(),
                middleware.clone(),
                wallet.clone(),
                beneficiary,
                builders,
                config.blocks_in_the_future,
            )));
        }
        handlers.push(Arc::new(IncOpsIncluded::new(reputation.clone())));
        pipelines.push(MiddlewarePipeline {
            middleware: middleware_address,
            handlers,
        });
    }

    let bundler = Arc::new(Bundler::new(
        provider.clone(),
        mempool.clone(),
        pipelines,
        chain_id,
        config.max_batch,
    ));
    bundler.run();

    let eth_api = EthApi::new(
        provider.clone(),
        pools,
        chain_id,
        EthApiSettings {
            op_lookup_limit: config.op_lookup_limit,
        },
    );
    let mut module = RpcModule::new(());
    module.merge(eth_api.into_rpc())?;
    if config.debug_mode {
        let debug_api = DebugApi::new(
            provider.clone(),
            mempool.clone(),
            reputation.clone(),
            bundler.clone(),
        );
        module.merge(debug_api.into_rpc())?;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let handle = aiops_rpc::serve(addr, module).await?;
    info!(%addr, mode = if config.eth_builder_urls.is_empty() { "private" } else { "searcher" }, "aiops bundler running");

    tokio::signal::ctrl_c()
        .await
        .context("should listen for shutdown signal")?;
    info!("shutting down");
    bundler.stop();
    let _ = handle.stop();
    handle.stopped().await;
    Ok(())
}
