// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session configuration.

use crate::alloc::DEFAULT_VIRTUAL_LAYER_BASE;
use crate::error::ConfigError;

/// Smallest accepted virtual layer base.
///
/// Host controllers address their physical layers with small non-negative
/// integers; virtual indices must live well clear of that range.
pub const MIN_VIRTUAL_LAYER_BASE: i32 = 0x1000;

/// Configuration applied when a [`crate::CloneSession`] is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// First index handed out by the virtual layer allocator.
    pub virtual_layer_base: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            virtual_layer_base: DEFAULT_VIRTUAL_LAYER_BASE,
        }
    }
}

impl SessionConfig {
    /// Returns a config with the given allocator base.
    pub fn with_virtual_layer_base(mut self, base: i32) -> Self {
        self.virtual_layer_base = base;
        self
    }

    /// Checks the config for values the session cannot honor.
    ///
    /// # Errors
    /// Returns [`ConfigError::BaseTooLow`] when the allocator base is below
    /// [`MIN_VIRTUAL_LAYER_BASE`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.virtual_layer_base < MIN_VIRTUAL_LAYER_BASE {
            return Err(ConfigError::BaseTooLow {
                base: self.virtual_layer_base,
                min: MIN_VIRTUAL_LAYER_BASE,
            });
        }
        Ok(())
    }
}
