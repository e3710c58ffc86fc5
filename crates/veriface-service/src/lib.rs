//! Veriface matching service: configuration, gallery storage and the
//! enroll/verify/search/identify orchestration on top of
//! [`veriface-core`](veriface_core).
//!
//! The calling layer (HTTP, CLI, PAM, …) constructs a [`FaceService`] from a
//! [`Config`], a [`FaceDetector`](veriface_core::FaceDetector)
//! implementation and a [`GalleryStore`], then drives it with primitive
//! inputs. No transport ships in this crate.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::ServiceError;
pub use service::{
    BatchEmbedItem, EnrollOutcome, FaceService, GalleryEntry, HealthReport, IdentifyOutcome,
    SearchMatch, VerifyOutcome,
};
pub use store::{EnrollmentRecord, GalleryStore, StoreError};
