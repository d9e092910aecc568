// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Process-wide compute resource configuration.
//!
//! Resource selection is an explicit call made once at process start,
//! never a side effect of referencing a component. The call is
//! idempotent: the first one wins, later calls are no-ops. The configured
//! pool lives until process end.

use rayon;
use std::sync::Once;

static INIT: Once = Once::new();

/// Compute resources of the process.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Config {
    /// Worker threads for data-parallel batch evaluation.
    /// Zero picks one thread per logical core.
    pub nb_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { nb_threads: 0 }
    }
}

/// Initialize the global compute pool. Safe to call once; subsequent
/// calls (with any configuration) return Ok without effect.
pub fn initialize(config: &Config) -> Result<(), String> {
    let mut result = Ok(());
    INIT.call_once(|| {
        if config.nb_threads > 0 {
            result = rayon::ThreadPoolBuilder::new()
                .num_threads(config.nb_threads)
                .build_global()
                .map_err(|e| e.to_string());
        }
    });
    result
}

// TESTS #############################################################
