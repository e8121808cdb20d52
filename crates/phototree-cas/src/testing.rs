//! EXIF fixture builders for tests.
//!
//! Produces TIFF blocks and JPEG files carrying any combination of the
//! three date fields, serialized with [`exif::experimental::Writer`].
//!
//! ```ignore
//! use phototree_cas::testing::ExifFixture;
//!
//! let jpeg = ExifFixture::new().original("2020:01:02 03:04:05").to_jpeg();
//! ```

use std::io::Cursor;

use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};

/// Builder for synthetic EXIF payloads.
#[derive(Debug, Clone, Default)]
pub struct ExifFixture {
    big_endian: bool,
    original: Option<String>,
    digitized: Option<String>,
    datetime: Option<String>,
}

fn ascii_field(tag: Tag, value: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![value.as_bytes().to_vec()]),
    }
}

impl ExifFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn original(mut self, value: &str) -> Self {
        self.original = Some(value.to_string());
        self
    }

    pub fn digitized(mut self, value: &str) -> Self {
        self.digitized = Some(value.to_string());
        self
    }

    pub fn datetime(mut self, value: &str) -> Self {
        self.datetime = Some(value.to_string());
        self
    }

    fn fields(&self) -> Vec<Field> {
        [
            (Tag::DateTimeOriginal, &self.original),
            (Tag::DateTimeDigitized, &self.digitized),
            (Tag::DateTime, &self.datetime),
        ]
        .into_iter()
        .filter_map(|(tag, value)| value.as_deref().map(|v| ascii_field(tag, v)))
        .collect()
    }

    /// Raw TIFF block (what follows `Exif\0\0` inside APP1).
    pub fn to_tiff(&self) -> Vec<u8> {
        let fields = self.fields();
        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut out = Cursor::new(Vec::new());
        writer
            .write(&mut out, !self.big_endian)
            .expect("Failed to serialize EXIF fixture");
        out.into_inner()
    }

    /// JPEG with SOI, a JFIF APP0, an APP1 Exif segment (when any field
    /// is set), a stub scan and EOI.
    pub fn to_jpeg(&self) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];

        // APP0 JFIF
        out.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        out.extend_from_slice(b"JFIF\0");
        out.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x48, 0x00, 0x48, 0x00, 0x00]);

        if self.original.is_some() || self.digitized.is_some() || self.datetime.is_some() {
            let mut payload = b"Exif\0\0".to_vec();
            payload.extend_from_slice(&self.to_tiff());
            let len = (payload.len() + 2) as u16;
            out.extend_from_slice(&[0xFF, 0xE1]);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&payload);
        }

        // SOS with a token scan, then EOI
        out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        out.extend_from_slice(&[0x37, 0xFF, 0xD9]);
        out
    }
}
