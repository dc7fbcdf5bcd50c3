//! Image building and remote deployment

pub mod descriptor;
pub mod image;
pub mod remote;

pub use descriptor::{DescriptorParams, RenderError};
pub use image::{BuildError, ImageBuilder, ImageRef, PushError, PushReport, RegistryCredentials};
pub use remote::{ConnectionError, DeployError, DeployReport, RemoteConfig, RemoteDeployer, Session};
