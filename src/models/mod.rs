pub mod citation;
pub mod enums;
pub mod fragment;
pub mod summary;

pub use citation::*;
pub use enums::*;
pub use fragment::*;
pub use summary::*;
