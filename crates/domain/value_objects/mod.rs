pub mod amounts;
pub mod enums;
pub mod payments;
