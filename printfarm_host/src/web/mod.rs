//! Public HTTP API for the workshop.

pub mod api;
