//! rtxss_agent: NVIDIA GPU telemetry over WebSocket.
//!
//! `sampler` polls `nvidia-smi` through `invoker`, `parser` turns the output
//! into a [`types::Sample`], which lands in `history` and is fanned out by
//! `broadcast`. `api`/`ws` are the HTTP surface; `control` changes the power
//! limit.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod control;
pub mod error;
pub mod history;
pub mod host;
pub mod invoker;
pub mod parser;
pub mod sampler;
pub mod state;
pub mod tls;
pub mod types;
pub mod ws;
