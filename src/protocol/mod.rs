//! JSON-RPC 2.0 framing and MCP method/error-code constants.

mod frame;
pub mod methods;

pub use frame::{split_lines, Frame, RequestId, RpcErrorObject};
