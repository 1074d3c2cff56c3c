//! Station geometry helpers.
//!
//! Small utilities around the station network used by `gxnet-nn`:
//!
//! - [`wind`]: Speed/direction to u/v components and back
//! - [`geo`]: Haversine great-circle distance
//! - [`adjacency`]: Distance matrix and Gaussian-kernel adjacency
//!
//! # Example
//!
//! ```rust
//! use gxnet_station::adjacency::{distance_matrix, gaussian_adjacency, Station};
//!
//! let stations = vec![
//!     Station::new("a", 106.0, 21.0),
//!     Station::new("b", 106.1, 21.1),
//! ];
//! let dist = distance_matrix(&stations);
//! let adj = gaussian_adjacency(dist.view(), 50_000.0, 0.01).unwrap();
//! assert_eq!(adj[[0, 0]], 1.0);
//! ```

pub mod adjacency;
pub mod error;
pub mod geo;
pub mod wind;

pub use adjacency::{distance_matrix, gaussian_adjacency, Station};
pub use error::{Error, Result};
pub use geo::haversine;
