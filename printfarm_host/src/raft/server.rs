//! Server side of the raft transport: a private axum router bound to the
//! node's raft address. Peers post the RPCs emitted by
//! [`super::network::HttpNetworkConnection`].

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use openraft::raft::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};

use super::{NodeId, Raft, TypeConfig};

pub fn raft_router(raft: Raft) -> Router {
    Router::new()
        .route("/raft/append_entries", post(append_entries))
        .route("/raft/vote", post(vote))
        .route("/raft/install_snapshot", post(install_snapshot))
        .with_state(raft)
}

async fn append_entries(
    State(raft): State<Raft>,
    Json(rpc): Json<AppendEntriesRequest<TypeConfig>>,
) -> impl axum::response::IntoResponse {
    Json(raft.append_entries(rpc).await)
}

async fn vote(
    State(raft): State<Raft>,
    Json(rpc): Json<VoteRequest<NodeId>>,
) -> impl axum::response::IntoResponse {
    Json(raft.vote(rpc).await)
}

async fn install_snapshot(
    State(raft): State<Raft>,
    Json(rpc): Json<InstallSnapshotRequest<TypeConfig>>,
) -> impl axum::response::IntoResponse {
    Json(raft.install_snapshot(rpc).await)
}
