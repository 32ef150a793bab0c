//! multipart/form-data encoding

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

use crate::body::MultipartPart;

/// Encodes multipart parts either into memory or into a temporary file.
///
/// The file produced by [`encode_to_temp_file`](Self::encode_to_temp_file) is
/// owned by the caller from then on; nothing deletes it automatically.
pub trait MultipartEncoder: Send + Sync {
    /// Exact number of bytes `encode` would produce for these parts
    fn content_length(&self, parts: &[MultipartPart], boundary: &str) -> u64;

    /// Encode the parts into a single buffer
    fn encode(&self, parts: &[MultipartPart], boundary: &str) -> io::Result<Bytes>;

    /// Encode the parts into a new temporary file and return its path
    fn encode_to_temp_file(&self, parts: &[MultipartPart], boundary: &str) -> io::Result<PathBuf>;
}

/// RFC 7578 encoder used by default
#[derive(Debug, Clone, Default)]
pub struct FormDataEncoder {
    temp_dir: Option<PathBuf>,
}

impl FormDataEncoder {
    /// Create an encoder writing temp files to the system temp directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Write temp files into `dir` instead of the system temp directory
    pub fn with_temp_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: Some(dir.into()),
        }
    }
}

impl MultipartEncoder for FormDataEncoder {
    fn content_length(&self, parts: &[MultipartPart], boundary: &str) -> u64 {
        let framed: usize = parts
            .iter()
            .map(|part| part_header(boundary, part).len() + part.content.len() + 2)
            .sum();
        (framed + closing_delimiter(boundary).len()) as u64
    }

    fn encode(&self, parts: &[MultipartPart], boundary: &str) -> io::Result<Bytes> {
        let mut data = BytesMut::with_capacity(self.content_length(parts, boundary) as usize);
        for part in parts {
            data.put_slice(part_header(boundary, part).as_bytes());
            data.put_slice(&part.content);
            data.put_slice(b"\r\n");
        }
        data.put_slice(closing_delimiter(boundary).as_bytes());
        Ok(data.freeze())
    }

    fn encode_to_temp_file(&self, parts: &[MultipartPart], boundary: &str) -> io::Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("courier-upload-").suffix(".multipart");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        {
            let mut writer = BufWriter::new(file.as_file());
            for part in parts {
                writer.write_all(part_header(boundary, part).as_bytes())?;
                writer.write_all(&part.content)?;
                writer.write_all(b"\r\n")?;
            }
            writer.write_all(closing_delimiter(boundary).as_bytes())?;
            writer.flush()?;
        }

        file.into_temp_path().keep().map_err(|e| e.error)
    }
}

/// Generate a fixed-length boundary unique within this process
pub fn generate_boundary() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!(
        "----formdata-courier-{:016x}{:08x}",
        timestamp as u64,
        COUNTER.fetch_add(1, Ordering::Relaxed) as u32
    )
}

fn part_header(boundary: &str, part: &MultipartPart) -> String {
    let mut header = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
        boundary,
        escape_quoted(&part.name)
    );
    if let Some(filename) = &part.filename {
        header.push_str(&format!("; filename=\"{}\"", escape_quoted(filename)));
    }
    header.push_str("\r\n");
    if let Some(content_type) = &part.content_type {
        header.push_str(&format!("Content-Type: {}\r\n", content_type));
    }
    header.push_str("\r\n");
    header
}

fn closing_delimiter(boundary: &str) -> String {
    format!("--{}--\r\n", boundary)
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_parts() -> Vec<MultipartPart> {
        vec![
            MultipartPart::text("field1", "value1"),
            MultipartPart::file(
                "file_field",
                b"This is file content".to_vec(),
                "test.txt",
                Some("text/plain".to_string()),
            ),
        ]
    }

    #[test]
    fn test_encode_layout() {
        let encoded = FormDataEncoder::new().encode(&sample_parts(), "XYZ").unwrap();
        let text = String::from_utf8(encoded.to_vec()).unwrap();

        assert!(text.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"field1\"\r\n"));
        assert!(text.contains("name=\"file_field\"; filename=\"test.txt\"\r\nContent-Type: text/plain\r\n\r\nThis is file content\r\n"));
        assert!(text.ends_with("--XYZ--\r\n"));
    }

    #[test]
    fn test_content_length_matches_encoding() {
        let encoder = FormDataEncoder::new();
        let parts = sample_parts();
        let encoded = encoder.encode(&parts, "boundary-1").unwrap();
        assert_eq!(encoder.content_length(&parts, "boundary-1"), encoded.len() as u64);
    }

    #[test]
    fn test_temp_file_matches_memory_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FormDataEncoder::with_temp_dir(dir.path());
        let parts = sample_parts();

        let path = encoder.encode_to_temp_file(&parts, "b").unwrap();
        assert!(path.starts_with(dir.path()));
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, encoder.encode(&parts, "b").unwrap().to_vec());
    }

    #[test]
    fn test_quotes_in_names_are_escaped() {
        let part = MultipartPart::file("a\"b", Bytes::new(), "x\ny.txt", None);
        let header = part_header("B", &part);
        assert!(header.contains("name=\"a\\\"b\""));
        assert!(header.contains("filename=\"x%0Ay.txt\""));
    }

    #[test]
    fn test_boundaries_are_unique() {
        assert_ne!(generate_boundary(), generate_boundary());
    }
}
