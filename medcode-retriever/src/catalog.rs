//! Reference catalog of coded entries
//!
//! The catalog is read once from a delimited text file and never mutated
//! afterwards. Entries are addressed by their position in the file; codes are
//! not assumed to be unique.
//!
//! ## Input contract
//!
//! The header row must contain the columns [`CODE_COLUMN`], [`LABEL_COLUMN`]
//! and [`DESCRIPTION_COLUMN`], spelled exactly as given (surrounding
//! whitespace is ignored). Any other columns are skipped.
//!
//! ```text
//! CODE,Medical term,Description
//! J20.9,Acute bronchitis,"Acute bronchitis, unspecified"
//! ```

use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

pub const CODE_COLUMN: &str = "CODE";
pub const LABEL_COLUMN: &str = "Medical term";
pub const DESCRIPTION_COLUMN: &str = "Description";

/// One coded reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "CODE")]
    pub code: String,
    #[serde(rename = "Medical term")]
    pub label: String,
    #[serde(rename = "Description")]
    pub description: String,
}

impl CatalogEntry {
    pub fn new(
        code: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
            description: description.into(),
        }
    }

    /// Text embedded for this entry: code, label and description joined by
    /// single spaces, in that order. Changing it invalidates every stored index.
    pub fn composite_text(&self) -> String {
        format!("{} {} {}", self.code, self.label, self.description)
    }
}

/// Immutable, position-addressed collection of [`CatalogEntry`] rows.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    source_name: String,
}

impl Catalog {
    /// Load a catalog file, inferring the delimiter from the extension
    /// (tab for `.tsv`/`.tab`, comma otherwise).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::load_with_delimiter(path, delimiter_for_path(path))
    }

    pub fn load_with_delimiter(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        let file = File::open(path)
            .map_err(|e| RetrievalError::catalog_load(&source_name, e.to_string()))?;
        let catalog = Self::from_reader(file, delimiter, source_name)?;
        info!(
            "Loaded {} catalog entries from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Parse a catalog from any reader. `source_name` only labels errors and logs.
    pub fn from_reader<R: Read>(
        reader: R,
        delimiter: u8,
        source_name: impl Into<String>,
    ) -> Result<Self> {
        let source_name = source_name.into();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| RetrievalError::catalog_load(&source_name, e.to_string()))?
            .clone();

        let column = |name: &str| -> Result<usize> {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                RetrievalError::catalog_load(&source_name, format!("missing column '{name}'"))
            })
        };
        let code_idx = column(CODE_COLUMN)?;
        let label_idx = column(LABEL_COLUMN)?;
        let description_idx = column(DESCRIPTION_COLUMN)?;
        debug!(
            "Catalog columns resolved: code={}, label={}, description={}",
            code_idx, label_idx, description_idx
        );

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                RetrievalError::catalog_load(&source_name, format!("line {line}: {e}"))
            })?;
            let cell = |idx: usize| record.get(idx).unwrap_or_default().to_string();
            entries.push(CatalogEntry {
                code: cell(code_idx),
                label: cell(label_idx),
                description: cell(description_idx),
            });
        }

        Ok(Self {
            entries,
            source_name,
        })
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries,
            source_name: "<memory>".to_string(),
        }
    }

    pub fn get(&self, index: usize) -> Result<&CatalogEntry> {
        self.entries
            .get(index)
            .ok_or(RetrievalError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Content hash over every entry in order. Persisted indexes carry it so
    /// a changed reference table is never paired with stale vectors.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            for field in [&entry.code, &entry.label, &entry.description] {
                hasher.update(&(field.len() as u64).to_le_bytes());
                hasher.update(field.as_bytes());
            }
        }
        *hasher.finalize().as_bytes()
    }
}

pub fn delimiter_for_path(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("tab") => b'\t',
        _ => b',',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
CODE,Medical term,Description,Chapter
J20.9,Acute bronchitis,\"Acute bronchitis, unspecified\",J
R50.9,Fever,\"Fever, unspecified\",R
";

    #[test]
    fn test_load_from_reader_ignores_extra_columns() {
        let catalog = Catalog::from_reader(SAMPLE.as_bytes(), b',', "sample").unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.get(0).unwrap(),
            &CatalogEntry::new("J20.9", "Acute bronchitis", "Acute bronchitis, unspecified")
        );
        assert_eq!(catalog.get(1).unwrap().label, "Fever");
        assert_eq!(catalog.source_name(), "sample");
    }

    #[test]
    fn test_missing_column_is_catalog_error() {
        let data = "CODE,Medical term\nJ20.9,Acute bronchitis\n";
        let err = Catalog::from_reader(data.as_bytes(), b',', "bad").unwrap_err();
        match err {
            RetrievalError::CatalogLoad { message, .. } => {
                assert!(message.contains("Description"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_bad_row_reports_its_line() {
        let mut data = b"CODE,Medical term,Description\nJ20.9,Acute bronchitis,x\n".to_vec();
        data.extend_from_slice(b"R50.9,Fe\xffver,y\n");
        let err = Catalog::from_reader(data.as_slice(), b',', "broken").unwrap_err();
        match err {
            RetrievalError::CatalogLoad { message, .. } => {
                assert!(message.starts_with("line 3"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_column_names_are_verbatim() {
        let data = "code,medical term,description\nJ20.9,Acute bronchitis,x\n";
        assert!(Catalog::from_reader(data.as_bytes(), b',', "lower").is_err());

        let padded = " CODE , Medical term ,Description\nJ20.9,Acute bronchitis,x\n";
        assert_eq!(
            Catalog::from_reader(padded.as_bytes(), b',', "padded")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_short_rows_load_empty_cells() {
        let data = "CODE,Medical term,Description\nZ00,Checkup\n";
        let catalog = Catalog::from_reader(data.as_bytes(), b',', "short").unwrap();
        assert_eq!(catalog.get(0).unwrap().description, "");
    }

    #[test]
    fn test_get_out_of_range() {
        let catalog = Catalog::from_reader(SAMPLE.as_bytes(), b',', "sample").unwrap();
        assert!(matches!(
            catalog.get(2),
            Err(RetrievalError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_load_tsv_file() -> anyhow::Result<()> {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile()?;
        writeln!(file, "CODE\tMedical term\tDescription")?;
        writeln!(file, "A00\tCholera\tCholera, unspecified")?;

        let catalog = Catalog::load(file.path())?;
        assert_eq!(catalog.get(0)?.description, "Cholera, unspecified");
        Ok(())
    }

    #[test]
    fn test_unreadable_file() {
        let err = Catalog::load("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, RetrievalError::CatalogLoad { .. }));
    }

    #[test]
    fn test_composite_text_order() {
        let entry = CatalogEntry::new("J20.9", "Acute bronchitis", "Acute bronchitis, unspecified");
        assert_eq!(
            entry.composite_text(),
            "J20.9 Acute bronchitis Acute bronchitis, unspecified"
        );
    }

    #[test]
    fn test_fingerprint_tracks_content() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(SAMPLE.as_bytes())?;
        let a = Catalog::load(file.path())?;
        let b = Catalog::from_reader(SAMPLE.as_bytes(), b',', "again")?;
        assert_eq!(a.fingerprint(), b.fingerprint());

        let changed = Catalog::from_entries(vec![CatalogEntry::new("J20.9", "Acute bronchitis", "")]);
        assert_ne!(a.fingerprint(), changed.fingerprint());
        Ok(())
    }
}
