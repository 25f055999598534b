pub mod interceptor;
pub mod jsonrpc;
pub mod outcome;
pub mod proxy;

pub use interceptor::{Disposition, Interceptor};
pub use jsonrpc::{rejection, RpcMessage, POLICY_ERROR_CODE, TOOL_CALL_METHODS};
pub use outcome::OutcomeObserver;
pub use proxy::{BrakeProxy, ProxyExit};
