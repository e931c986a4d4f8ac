#[cfg(feature = "std")]
pub mod hash;
