//! Transport helpers. The protocol engine itself only needs an ordered,
//! reliable byte stream.

mod tcp;

pub use tcp::{connect, listen};
