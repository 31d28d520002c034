#![cfg(test)]
use std::path::{Path, PathBuf};

use crate::npy::MAGIC;
use crate::{HEADER_SIZE, IMAGE_HEIGHT, IMAGE_WIDTH};

const RECORD_SIZE: usize = IMAGE_WIDTH * IMAGE_HEIGHT;

/// Pixel value at `index` of the data section; 251 is prime, so consecutive records differ
fn pixel(index: usize) -> u8 {
    (index % 251) as u8
}

fn push_records(bytes: &mut Vec<u8>, records: usize) {
    bytes.extend((0..records * RECORD_SIZE).map(pixel));
}

/// A version 1.0 npy file, as written by older numpy (header padded to 80 bytes),
/// followed by `records` images
pub fn npy_dataset(descr: &str, fortran_order: bool, shape: &[usize], records: usize) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape = match dims.len() {
        1 => format!("({},)", dims[0]),
        _ => format!("({})", dims.join(", ")),
    };
    let order = if fortran_order { "True" } else { "False" };

    let mut text = format!("{{'descr': '{descr}', 'fortran_order': {order}, 'shape': {shape}, }}");
    let prefix_len = MAGIC.len() + 2 + 2;
    assert!(prefix_len + text.len() < HEADER_SIZE, "header text too long");
    while prefix_len + text.len() + 1 < HEADER_SIZE {
        text.push(' ');
    }
    text.push('\n');

    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
    bytes.extend_from_slice(text.as_bytes());
    assert_eq!(bytes.len(), HEADER_SIZE);

    push_records(&mut bytes, records);
    bytes
}

/// `HEADER_SIZE` bytes of filler without npy magic, followed by `records` images
pub fn raw_dataset(records: usize) -> Vec<u8> {
    let mut bytes = vec![0xAA; HEADER_SIZE];
    push_records(&mut bytes, records);
    bytes
}

/// Scratch directory that is removed again when dropped
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "npy-records-{}-{}",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[test]
fn fixtures_have_the_dataset_layout() {
    let npy = npy_dataset("|u1", false, &[2, 784], 2);
    let raw = raw_dataset(2);

    assert_eq!(npy.len(), HEADER_SIZE + 2 * RECORD_SIZE);
    assert_eq!(raw.len(), npy.len());
    assert_eq!(&npy[HEADER_SIZE..], &raw[HEADER_SIZE..]);
    assert_ne!(&npy[HEADER_SIZE..][..RECORD_SIZE], &npy[HEADER_SIZE + RECORD_SIZE..]);
}
