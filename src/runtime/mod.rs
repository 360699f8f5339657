pub mod docker;
pub mod provisioner;

pub use docker::{DockerConfig, DockerProvisioner};
pub use provisioner::{
    BackingHandle, ProvisionError, ProvisionSpec, Provisioner, SimulatedProvisioner,
};
