pub mod apply;
pub mod render;
pub mod sources;
pub mod util;
