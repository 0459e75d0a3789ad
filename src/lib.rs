//! Online match synchronization core for the gridwalk board game.
//!
//! Browser clients share one evolving game document through a [`dao::state_store::StateStore`],
//! reconcile remote snapshots into local views, resolve ambiguous endings by majority vote and
//! track each other's connectivity. Nothing here runs server-side game logic.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
