// Sigvault — Gateway Module
//
// Unix Domain Socket (UDS) server exposing the signer registry to local
// processes as JSON-RPC 2.0.

mod protocol;
mod uds;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use uds::{process_request, send_request, UdsServer};
