pub mod config;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod secrets;

pub use config::Config;
pub use error::*;
pub use manifest::{AgentManifest, ManifestFile, SecretSpec, ToolCallFormat, ToolManifest, ToolRef};
pub use registry::{FsRegistry, MemoryRegistry, Registry, RegistryIndex};
pub use secrets::{EnvSecrets, SecretMap, SecretSource};
