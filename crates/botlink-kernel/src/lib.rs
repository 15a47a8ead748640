//! `botlink-kernel` – call resolution and dispatch.
//!
//! Everything between a decoded [`CallRequest`][botlink_types::CallRequest]
//! and the device lives here.
//!
//! # Modules
//!
//! - [`decoder`] – turns `{"__type", "value"}` wire objects into typed
//!   [`Arg`][decoder::Arg]s.
//! - [`corner_cache`] – [`CornerLightCache`][corner_cache::CornerLightCache]:
//!   remembers the last applied corner lights of each cube so clients can
//!   update one corner at a time.
//! - [`path`] – parses dotted, indexed call paths.
//! - [`capability_table`] – [`CapabilityTable`][capability_table::CapabilityTable]:
//!   the allow-list of callable paths and their handlers.
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: resolves,
//!   decodes, invokes on a blocking worker and optionally awaits completion.

pub mod capability_table;
pub mod corner_cache;
pub mod decoder;
pub mod dispatcher;
pub mod path;

pub use capability_table::{CapabilityTable, Invocation, Invoked};
pub use corner_cache::CornerLightCache;
pub use decoder::{Arg, DecodeError, TypedTag, decode, decode_typed};
pub use dispatcher::Dispatcher;
