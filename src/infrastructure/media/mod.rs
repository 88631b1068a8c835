pub mod image_compressor;

pub use image_compressor::{JPEG_CONTENT_TYPE, JpegCompressor};
