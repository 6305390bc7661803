//! Application services.
//!
//! Outbound integrations (email, payments), upload processing and the
//! computations that sit beside the generic resource handlers.

pub mod email;
pub mod images;
pub mod payments;
pub mod ratings;
pub mod tours;
