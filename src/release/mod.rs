//! Release coordinates and artifact location
//!
//! A [`ReleaseCoordinate`] names exactly one prebuilt binary. The
//! [`ArtifactLocator`] maps it to a download URL and a cache path without
//! touching the network or the filesystem.

pub mod coordinate;
pub mod locator;

pub use coordinate::{Architecture, Platform, ReleaseCoordinate};
pub use locator::ArtifactLocator;
