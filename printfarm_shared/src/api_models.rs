//! Shared request/response models for the workshop HTTP API.

use serde::{Deserialize, Serialize};

/// Body of `POST /join`: the joining node's id and raft-transport address.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JoinRequest {
    pub id: String,
    pub addr: String,
}

/// Generic acknowledgement for successful mutations.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AckResponse {
    pub result: String,
}

impl AckResponse {
    pub fn ok() -> Self {
        AckResponse {
            result: "ok".to_string(),
        }
    }
}
