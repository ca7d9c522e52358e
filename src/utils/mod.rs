// Utility modules

pub mod image_ops;

pub use image_ops::load_image_from_path;
