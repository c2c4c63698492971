use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Extensions accepted by the image picker
pub const IMAGE_EXTENSIONS: &[&str] = &["iso"];
/// Extensions accepted when importing a BIOS dump
pub const BIOS_EXTENSIONS: &[&str] = &["bin"];

/// MD5 of a disc image, streamed so multi-gigabyte images are not loaded at once
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare a computed digest to a configured one, ignoring case and whitespace
pub fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

/// Case-insensitive extension check
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)))
}
