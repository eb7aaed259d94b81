//! Link discovery: which device, and at which rate.

pub mod baud;
pub mod ports;

pub use baud::{BaudObservation, BaudScan, BaudScanConfig, next_step};
pub use ports::{DiscoveredPort, PortScanConfig, PortScanner, persist_discovery};
