//! Pull-driven routing for live media pipelines.
//!
//! A [`router::Router`] multiplexes interleaved encoded units from one
//! [`stage::PacketSource`] across per-stream decode → filter → encode chains
//! and yields exactly one [`router::PullResult`] per pull. Stage
//! implementations (codecs, filter graphs, muxers) are supplied by the caller
//! behind the traits in [`stage`]; [`session::PipeSession`] wraps a router in
//! a cancellable task that fans frames out to subscribers and routes packets
//! into a [`sink::SinkRouter`].

pub mod chain;
pub mod error;
pub mod frame;
pub mod guard;
pub mod packet;
pub mod router;
pub mod session;
pub mod sink;
pub mod stage;
pub mod stream;

#[cfg(test)]
mod testing;
