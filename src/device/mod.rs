pub mod arbiter;
pub mod model;

pub use arbiter::{ClaimResult, DeviceArbiter};
pub use model::{Device, DeviceId, DeviceKind};
