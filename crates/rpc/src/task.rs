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

use std::net::SocketAddr;

use anyhow::Context;
use jsonrpsee::server::{RpcModule, ServerBuilder, ServerHandle};
use tracing::info;

/// Start the JSON-RPC server with the given merged module. The server
/// answers on any request path, which covers both `/` and `/rpc`.
pub async fn serve(addr: SocketAddr, module: RpcModule<()>) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default()
        .build(addr)
        .await
        .context("should bind RPC server")?;
    let local_addr = server.local_addr().context("should read bound address")?;
    let handle = server.start(module);
    info!(%local_addr, "RPC server started");
    Ok(handle)
}
