//! Fixtures shared by the unit tests: real ZIP archives and tiny encoded images.

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use zip::write::FileOptions;

pub fn encoded_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn tiny_png() -> Vec<u8> {
    encoded_png(4, 6)
}

/// Write a ZIP at `dir/name`. Names ending in `/` become directory entries.
pub fn write_cbz(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (entry_name, data) in entries {
        if entry_name.ends_with('/') {
            zip.add_directory(*entry_name, options).unwrap();
        } else {
            zip.start_file(*entry_name, options).unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap();
    path
}
