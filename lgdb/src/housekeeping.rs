// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic reclamation of lapsed cached responses across all sources.

use crate::config::HousekeepingConfig;
use crate::error::Error;
use crate::log::hk_log;
use crate::source::SourceRegistry;
use lg_common::thread::{PeriodicThread, DEFAULT_RESOLUTION};
use slog::Logger;
use std::sync::Arc;

pub struct Housekeeping {
    sources: Arc<SourceRegistry>,
    config: HousekeepingConfig,
    log: Logger,
}

impl Housekeeping {
    pub fn new(
        sources: Arc<SourceRegistry>,
        config: HousekeepingConfig,
        log: Logger,
    ) -> Self {
        Self {
            sources,
            config,
            log,
        }
    }

    /// Expire the caches of every source once. Returns the total number of
    /// responses dropped.
    pub fn run_once(&self) -> usize {
        let mut total = 0;
        for h in self.sources.iter() {
            let n = h.source.expire_caches();
            hk_log!(self.log, debug, "expired cached responses of {}", h.id;
                "source" => h.id.to_string(),
                "expired" => n
            );
            total += n;
        }
        hk_log!(self.log, info, "housekeeping done"; "expired" => total);
        total
    }

    pub fn start(self: &Arc<Self>) -> Result<PeriodicThread, Error> {
        let hk = self.clone();
        Ok(PeriodicThread::spawn(
            "housekeeping",
            self.config.interval,
            DEFAULT_RESOLUTION,
            move || {
                hk.run_once();
            },
        )?)
    }
}
