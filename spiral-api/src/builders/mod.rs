pub mod optimizer;
pub mod spiral;
