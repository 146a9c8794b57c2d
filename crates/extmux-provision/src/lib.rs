//! ExtMux Instance Provisioning
//!
//! Turns a [`ServiceDefinition`] template into a tenant-dedicated instance and
//! back. The [`InstanceProvisioner`] trait is the seam the service directory
//! drives; [`HttpProvisioner`] talks to a control-plane REST API.

pub mod definition;
pub mod error;
pub mod http;
pub mod provisioner;

pub use definition::{EnvVar, InstanceSpec, ServiceDefinition};
pub use error::{ProvisionError, Result};
pub use http::{HttpProvisioner, HttpProvisionerConfig};
pub use provisioner::InstanceProvisioner;
