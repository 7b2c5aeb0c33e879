//! Initializer domain logic.
//!
//! [`admission`] decides what should happen to a delivered Deployment,
//! [`patch`] turns that decision into a strategic merge patch, and
//! [`initializer`] runs both for every event of the feed.

pub mod admission;
pub mod error;
pub mod initializer;
pub mod patch;

pub use admission::Admission;
pub use admission::AdmissionPolicy;
pub use error::InitializerError;
pub use initializer::Outcome;
pub use initializer::SidecarInitializer;
pub use patch::PatchRequest;
