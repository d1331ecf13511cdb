pub mod probe;
pub mod rpc;
pub mod transport;

pub use probe::{ProbeOutcome, probe};
pub use rpc::{RpcClient, RpcHandler, RpcServer, ServerHandle};
pub use transport::Transport;
