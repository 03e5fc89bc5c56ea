//! Exchange provider contracts.
//!
//! This module contains:
//! - The `ExchangeProvider` lifecycle trait every pooled client implements
//! - The `(feature, transport) -> handler` table built at registration
//! - Cancellable event streams returned by streaming handlers
//!
//! Wire-level implementations (REST endpoints, websocket parsers) live with
//! each exchange integration; this crate only routes to them.

mod handler;
mod stream;
mod traits;

pub use handler::{
    FeatureHandler, HandlerArgs, HandlerTable, ProviderHandle, RestFuture, StreamFuture,
};
pub use stream::{EventStream, StreamConnection, StreamSubscription};
pub use traits::ExchangeProvider;
