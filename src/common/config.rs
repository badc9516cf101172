/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Runtime configuration.
//!
//! All tunables of the runtime live in [`CoveyConfig`], loaded once into
//! the process-wide [`struct@CONFIG`]. A TOML file named by the
//! `COVEY_CONFIG` environment variable overrides the defaults; every field
//! is optional in the file because each sub-struct carries its own
//! `Default`.

use lazy_static::lazy_static;
use serde::Deserialize;
use tracing::{error, trace};

/// Configuration for the Covey runtime.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoveyConfig {
    /// Limits and capacity configuration.
    pub limits: LimitsConfig,
    /// Behavioral switches.
    pub behavior: BehaviorConfig,
    /// Default names used for implicitly created objects.
    pub defaults: DefaultsConfig,
}

/// Limits and capacity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of demands a work thread pops for one agent before
    /// yielding to other agents.
    pub work_batch_size: usize,
    /// Maximum depth of overflow redirections before a message is dropped.
    pub max_redirection_depth: u32,
}

/// Behavioral switches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Stop the environment automatically when the last cooperation
    /// deregisters.
    pub autoshutdown: bool,
}

/// Default names used for implicitly created objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Name of the dispatcher the environment creates at launch.
    pub default_dispatcher_name: String,
    /// Prefix used when generating names for anonymous cooperations.
    pub anonymous_coop_prefix: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            work_batch_size: 16,
            max_redirection_depth: 32,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self { autoshutdown: true }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            default_dispatcher_name: "default".to_string(),
            anonymous_coop_prefix: "coop".to_string(),
        }
    }
}

impl CoveyConfig {
    /// Loads the configuration from the file named by `COVEY_CONFIG`,
    /// falling back to defaults when the variable is unset or the file
    /// cannot be read or parsed. A parse failure is logged, never fatal.
    pub fn load() -> Self {
        let Some(path) = std::env::var_os("COVEY_CONFIG") else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<Self>(&text) {
                Ok(config) => {
                    trace!(path = ?path, "loaded runtime configuration");
                    config
                }
                Err(e) => {
                    error!(path = ?path, error = %e, "failed to parse configuration, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                error!(path = ?path, error = %e, "failed to read configuration, using defaults");
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// The process-wide configuration, loaded on first use.
    pub static ref CONFIG: CoveyConfig = CoveyConfig::load();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoveyConfig::default();
        assert!(config.limits.work_batch_size > 0);
        assert!(config.behavior.autoshutdown);
        assert_eq!(config.defaults.default_dispatcher_name, "default");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: CoveyConfig = toml::from_str("[limits]\nwork_batch_size = 4\n").unwrap();
        assert_eq!(config.limits.work_batch_size, 4);
        assert_eq!(config.limits.max_redirection_depth, 32);
        assert!(config.behavior.autoshutdown);
    }
}
