//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use bundle_cache::prelude::*;
//! ```

pub use crate::bundle::{BundleStore, ContainerId, DirBundleStore, MemoryBundleStore, Payload};
pub use crate::cache::{AssetRef, ReleaseOutcome, ResourceCache};
pub use crate::config::AssetConfig;
pub use crate::context::{AssetContext, SceneClear, SpawnTicket};
pub use crate::error::{AssetError, Result};
pub use crate::fingerprint::Fingerprint;
pub use crate::manifest::{JsonManifest, ManifestEntry, ManifestIndex, ManifestSource};
pub use crate::pool::{InstanceId, InstanceRelease, Instantiator, ReleaseOptions};
pub use crate::scheduler::{LoadHandle, LoadOutcome, LoadPriority};
