// printfarm_host: a single workshop node. The FSM applies committed commands,
// the raft module wires the consensus library, the store façade linearizes
// writes, and the web module serves the HTTP API.

pub mod fsm;
pub mod raft;
pub mod store;
pub mod web;
