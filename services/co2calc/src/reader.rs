//! Encoding-resilient reader for delimited text exports.
//!
//! Files arrive as UTF-8 or as a single-byte legacy encoding. Each candidate
//! encoding is tried in order with strict decoding; the first one that decodes
//! the whole file wins. All fields stay raw text so numeric parsing happens
//! explicitly downstream.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LoadError;

/// Primary encoding first, then the legacy fallback.
pub const DEFAULT_ENCODINGS: &[&Encoding] = &[UTF_8, WINDOWS_1252];

pub const DEFAULT_DELIMITER: u8 = b';';

/// One data row with its source line number (header is line 1).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: usize,
    pub fields: Vec<String>,
}

/// A decoded file: header plus text rows aligned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub path: PathBuf,
    pub encoding: &'static str,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct EncodingReader {
    delimiter: u8,
    candidates: Vec<&'static Encoding>,
}

impl Default for EncodingReader {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            candidates: DEFAULT_ENCODINGS.to_vec(),
        }
    }
}

impl EncodingReader {
    pub fn new(delimiter: u8, candidates: &[&'static Encoding]) -> Self {
        Self {
            delimiter,
            candidates: candidates.to_vec(),
        }
    }

    pub fn candidate_names(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|e| e.name()).collect()
    }

    /// Name of the encoding tried first.
    pub fn primary_encoding(&self) -> Option<&'static str> {
        self.candidates.first().map(|e| e.name())
    }

    /// Read and decode a file from disk.
    pub fn read(&self, path: &Path) -> Result<RawTable, LoadError> {
        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.read_bytes(path, &bytes)
    }

    /// Decode already-loaded bytes; `path` is only used for provenance.
    pub fn read_bytes(&self, path: &Path, bytes: &[u8]) -> Result<RawTable, LoadError> {
        let (content, encoding) = self.decode(bytes).ok_or_else(|| LoadError::Decode {
            path: path.to_path_buf(),
            attempted: self.candidate_names(),
        })?;
        tracing::debug!(file = %path.display(), encoding, "decoded file");

        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        let (headers, rows) = self.split_records(path, content)?;

        Ok(RawTable {
            path: path.to_path_buf(),
            encoding,
            headers,
            rows,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Option<(String, &'static str)> {
        self.candidates.iter().find_map(|encoding| {
            encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| (text.into_owned(), encoding.name()))
        })
    }

    fn split_records(
        &self,
        path: &Path,
        content: &str,
    ) -> Result<(Vec<String>, Vec<RawRow>), LoadError> {
        let csv_error = |source: csv::Error| LoadError::Csv {
            path: path.to_path_buf(),
            line: source.position().map(|p| p.line()).unwrap_or(1),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result.map_err(csv_error)?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 2);

            let mut fields: Vec<String> = record.iter().map(|f| f.to_string()).collect();
            if fields.len() > headers.len() {
                tracing::debug!(
                    file = %path.display(),
                    line,
                    extra = fields.len() - headers.len(),
                    "row has more fields than the header, extra fields ignored"
                );
            }
            fields.resize(headers.len(), String::new());
            rows.push(RawRow { line, fields });
        }

        Ok((headers, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn path() -> PathBuf {
        PathBuf::from("test.csv")
    }

    #[test]
    fn test_reads_utf8_semicolon_file() {
        let content = "ID_MATERIAL;QUANTITY;AMOUNT_NET\n000123;4;100,50\n";
        let table = EncodingReader::default()
            .read_bytes(&path(), content.as_bytes())
            .unwrap();
        assert_eq!(table.encoding, "UTF-8");
        assert_eq!(table.headers, vec!["ID_MATERIAL", "QUANTITY", "AMOUNT_NET"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].fields, vec!["000123", "4", "100,50"]);
        assert_eq!(table.rows[0].line, 2);
    }

    #[test]
    fn test_falls_back_to_legacy_encoding() {
        // "Désignation" in windows-1252: 0xE9 is not valid UTF-8 on its own
        let mut bytes = b"ID_MATERIAL;D".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"signation\n1;Caf");
        bytes.push(0xE9);
        bytes.push(b'\n');

        let table = EncodingReader::default().read_bytes(&path(), &bytes).unwrap();
        assert_eq!(table.encoding, "windows-1252");
        assert_eq!(table.headers[1], "Désignation");
        assert_eq!(table.rows[0].fields[1], "Café");
    }

    #[test]
    fn test_decode_error_enumerates_candidates() {
        let reader = EncodingReader::new(b';', &[UTF_8]);
        let err = reader.read_bytes(&path(), &[0xFF, 0xFE, 0x00]).unwrap_err();
        match err {
            LoadError::Decode { attempted, .. } => assert_eq!(attempted, vec!["UTF-8"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bom_stripped_and_headers_trimmed() {
        let content = "\u{feff} ID_MATERIAL ; QUANTITY\n1; 2 \n";
        let table = EncodingReader::default()
            .read_bytes(&path(), content.as_bytes())
            .unwrap();
        assert_eq!(table.headers, vec!["ID_MATERIAL", "QUANTITY"]);
        // data fields stay verbatim
        assert_eq!(table.rows[0].fields[1], " 2 ");
    }

    #[test]
    fn test_short_rows_padded() {
        let content = "A;B;C\n1;2\n";
        let table = EncodingReader::default()
            .read_bytes(&path(), content.as_bytes())
            .unwrap();
        assert_eq!(table.rows[0].fields, vec!["1", "2", ""]);
    }

    #[test]
    fn test_fields_are_never_coerced() {
        let content = "A;B\n0001;1,5\n";
        let table = EncodingReader::default()
            .read_bytes(&path(), content.as_bytes())
            .unwrap();
        assert_eq!(table.rows[0].fields, vec!["0001", "1,5"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EncodingReader::default()
            .read(Path::new("/nonexistent/billing.csv"))
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Num_art;FE\n0042;1,5\n").unwrap();
        let table = EncodingReader::default().read(file.path()).unwrap();
        assert_eq!(table.column_index("FE"), Some(1));
        assert!(table.has_column("Num_art"));
    }
}
