pub mod payload;
pub mod pricing;

pub use payload::{InvoicePayload, PayloadError};
pub use pricing::{Plan, PricingError, PricingTable, Rail};
