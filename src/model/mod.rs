pub mod document;
pub mod lorawan;
pub mod merge;
pub mod position;
