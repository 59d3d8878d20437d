//! Backend selection for player connections
pub mod load_balancer;

pub use load_balancer::{LoadBalancer, Selection, SelectionSource};
