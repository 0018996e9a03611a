//! External tools: call parsing, gateway client, authorization.

pub mod call_parser;
pub mod gateway;
pub mod policy;

pub use call_parser::{parse_tool_calls, ToolCallRequest, ToolMode};
pub use gateway::{
    GatewayError, HttpToolGateway, ToolCallOutput, ToolCatalog, ToolContent, ToolDescriptor,
    ToolGateway,
};
pub use policy::{Authorization, DenyAllOperator, OperatorPrompt, ToolPolicy};
