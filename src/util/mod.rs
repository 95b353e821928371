pub mod buf;
pub mod sequence;
