// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types

use std::fmt;

use crate::bundle::ContainerId;
use crate::fingerprint::Fingerprint;

/// Asset layer error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    /// Fingerprint has no manifest entry
    Resolution { fingerprint: Fingerprint, path: String },

    /// Container could not be loaded by the bundle store
    ContainerLoad { container: ContainerId, reason: String },

    /// Asset missing from its loaded container
    Extract {
        fingerprint: Fingerprint,
        container: ContainerId,
        asset_name: String,
    },

    /// Live object could not be created from a decoded payload
    Instantiate { fingerprint: Fingerprint },

    /// Release without matching acquire, double release or over-release
    RefCount(RefCountError),

    /// Instance handle not owned by the pool, or released twice
    PoolOwnership(String),

    /// Manifest supplier failed (fatal at startup)
    Manifest(String),

    /// Configuration could not be parsed
    Config(String),

    /// IO error (file operations, etc.)
    Io(String),
}

/// Detailed reference counting errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefCountError {
    /// Asset released that the cache does not hold
    UnknownAsset(Fingerprint),
    /// Asset released while its count is already zero
    AlreadyIdle(Fingerprint),
    /// Payload released that no cache entry owns
    UnknownPayload,
    /// Container released that is not loaded
    ContainerNotLoaded(ContainerId),
}

impl fmt::Display for RefCountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefCountError::UnknownAsset(fp) => {
                write!(f, "release of {fp} which is not cached")
            }
            RefCountError::AlreadyIdle(fp) => {
                write!(f, "release of {fp} whose reference count is already zero")
            }
            RefCountError::UnknownPayload => write!(f, "release of a payload the cache does not own"),
            RefCountError::ContainerNotLoaded(id) => {
                write!(f, "release of container {id} which is not loaded")
            }
        }
    }
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::Resolution { fingerprint, path } => {
                write!(f, "Resolution error: {fingerprint} ({path}) is not in the manifest")
            }
            AssetError::ContainerLoad { container, reason } => {
                write!(f, "Load error: container {container}: {reason}")
            }
            AssetError::Extract {
                fingerprint,
                container,
                asset_name,
            } => write!(
                f,
                "Load error: asset {asset_name} ({fingerprint}) not found in container {container}"
            ),
            AssetError::Instantiate { fingerprint } => {
                write!(f, "Load error: could not instantiate {fingerprint}")
            }
            AssetError::RefCount(err) => write!(f, "Reference count error: {err}"),
            AssetError::PoolOwnership(msg) => write!(f, "Pool ownership error: {msg}"),
            AssetError::Manifest(msg) => write!(f, "Manifest error: {msg}"),
            AssetError::Config(msg) => write!(f, "Config error: {msg}"),
            AssetError::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for AssetError {}

impl AssetError {
    /// Load failures that the boundary recovers from by returning no payload
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AssetError::Resolution { .. }
                | AssetError::ContainerLoad { .. }
                | AssetError::Extract { .. }
                | AssetError::Instantiate { .. }
        )
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::Io(err.to_string())
    }
}

impl From<RefCountError> for AssetError {
    fn from(err: RefCountError) -> Self {
        AssetError::RefCount(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AssetError>;
