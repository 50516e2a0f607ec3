//! Domain types shared by the pipeline and its consumers.

pub mod bar;

pub use bar::Bar;
