// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::types::SourceId;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("source not found: {0}")]
    SourceNotFound(SourceId),

    #[error("neighbor not found: {0}")]
    NeighborNotFound(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("community not found: {0}")]
    CommunityNotFound(String),

    #[error("invalid community key: {0}")]
    InvalidCommunity(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal communication error: {0}")]
    InternalCommunication(String),
}
