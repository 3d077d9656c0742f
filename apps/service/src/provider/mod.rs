/// Measurement provider module - talks to the external probing network
///
/// Creating a measurement returns an opaque id; the result is fetched by
/// polling that id until the provider reports it finished.
pub mod client;
pub mod types;

pub use client::{GlobalpingClient, MeasurementProvider, ProviderError};
pub use types::{MeasurementRequest, MeasurementResponse};
