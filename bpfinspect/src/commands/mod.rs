pub mod fixture;
pub mod map;
pub mod prog;
pub mod version;
