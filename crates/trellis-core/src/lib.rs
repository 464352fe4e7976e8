//! Trellis core data types
//!
//! This crate provides the leaf types shared by the runtime and embedders:
//! - `NameMap`: string-keyed hash map with allocation-free lookups
//! - `Enum` / `EnumItem`: process-wide enumeration singletons
//! - `Vector3` / `Color3`: plain math data types crossing the script boundary

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod color3;
pub mod enums;
pub mod name_map;
pub mod vector3;

pub use color3::Color3;
pub use enums::{find_enum, find_enum_item, Enum, EnumItem, SECURITY_CONTEXT, SIGNAL_BEHAVIOR};
pub use name_map::NameMap;
pub use vector3::Vector3;
