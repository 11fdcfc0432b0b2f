pub mod classification;
pub mod colormap;
pub mod contrast;
pub mod enhancer;
pub mod heuristic;
pub mod inference;
pub mod protocol;
pub mod raw_image;
