//! Small shared helpers.

pub mod tool_call_assembler;

pub use tool_call_assembler::ToolCallAssembler;
