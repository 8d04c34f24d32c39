//! Network-side concerns: connectivity probing.

mod connectivity;

pub use connectivity::ConnectivityMonitor;
