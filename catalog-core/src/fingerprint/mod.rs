//! Fingerprint primitives: the DCT perceptual hash, Hamming distance, the color
//! descriptor, and the MD5 content hash.

pub mod color;
pub mod dct;
pub mod hamming;
pub mod md5;

pub use color::ColorDescriptor;
pub use hamming::Hamming;
