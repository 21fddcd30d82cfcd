pub mod hasher;
pub mod object_id;
pub mod object_type;

pub const OBJECT_ID_LENGTH: usize = 20;
pub const OBJECT_ID_HEX_LENGTH: usize = 40;
