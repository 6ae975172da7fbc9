//! This crate turns streams of raw visual-localization results into stable
//! map alignments.
//!
//! A localization attempt asks "where was this camera image taken, expressed
//! in some loaded map's coordinate frame?". Results arrive asynchronously,
//! noisily, and possibly from several different maps at once. Three layers
//! cooperate to make something displayable out of that:
//!
//! * [`PoseFilter`]: a per-map temporal smoothing state machine with
//!   outlier damping. One exists per loaded map; they are never shared.
//! * [`SpaceRegistry`]: owns all currently loaded [`MapSpace`]s and the
//!   scene offsets they were authored with.
//! * [`Localizer`]: the orchestrator. It issues localization attempts
//!   against pluggable platform/engine collaborators, funnels completions
//!   back onto its owning thread, routes each result to the right filter,
//!   manages map-switch bookkeeping and emits [`LocalizationEvent`]s.
//!
//! # Threading
//!
//! All orchestrator and filter state has one logical owner thread. Attempts
//! run in parallel on background threads, but their completions are drained
//! serially by [`Localizer::pump`] on the owning thread, so the registry and
//! filters are never touched concurrently and no locks are needed. If two
//! completions are pending at once they are processed in resume order, not
//! issue order; localization results per map are order-independent samples,
//! so this is harmless.

mod event;
mod filter;
mod localizer;
mod quality;
mod registry;
mod settings;
mod worker;

pub use event::*;
pub use filter::*;
pub use localizer::*;
pub use quality::*;
pub use registry::*;
pub use settings::*;

pub use vloc_core;
pub use vloc_geodesy;
