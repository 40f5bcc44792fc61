// stackdeploy - CloudFormation deployments driven by a manifest
//
// The binary wires the pieces together:
// - Runtime configuration and the manifest come from stackdeploy-config
// - Workflows (parameters, stacks, changesets, scripts) live in stackdeploy-core
// - stackdeploy-aws provides the CloudFormation client
//
// This crate owns the terminal: colored progress output on stdout and
// tracing on stderr (plus an optional debug log file).

pub mod commands;
pub mod generate;
mod init;
pub mod render;

pub use init::init_tracing;
