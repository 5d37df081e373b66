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

//! Path fingerprints used as cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// CRC-32 of a logical asset path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u32);

impl Fingerprint {
    /// Fingerprint a logical path
    pub fn of(path: &str) -> Self {
        Self(crc32fast::hash(path.as_bytes()))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(path: &str) -> Self {
        Self::of(path)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::of("Assets/GameData/Prefabs/Attack.prefab");
        let b = Fingerprint::of("Assets/GameData/Prefabs/Attack.prefab");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_matches_crc32() {
        // Standard CRC-32 check value
        assert_eq!(Fingerprint::of("123456789").raw(), 0xCBF4_3926);
    }

    #[test]
    fn test_distinct_paths() {
        assert_ne!(
            Fingerprint::of("Assets/Sounds/menusound.mp3"),
            Fingerprint::of("Assets/Sounds/menusound.wav")
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Fingerprint::from_raw(0xab).to_string(), "#000000ab");
    }
}
