pub mod gateway;
pub mod provisioner;
