//! Request routing.

mod data_router;

pub use data_router::DataRouter;
