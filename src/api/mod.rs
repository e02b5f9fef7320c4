//! Cocktail Edge API
//!
//! The public surface a host application calls to run and query the edge.

pub mod edge_api;
