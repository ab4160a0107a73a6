/// Native module contains implementations of core traits that work
/// directly against the local filesystem, child processes and the network.
pub mod gateway;
pub mod provisioner;
pub mod source_file;
