//! Connection records persisted in an `.xlsx` workbook.
//!
//! Rows are identified by their 0-based position below the header row.
//! Every operation reads the whole sheet; every change rewrites it.
//! Columns other than [`COLUMNS`] are carried through untouched and written
//! after the known ones.

use super::xlsx::{read_first_sheet, write_workbook, XlsxError};
use crate::util::write_atomic;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Header row, in column order.
pub const COLUMNS: [&str; 6] = [
    "Name",
    "Company",
    "Connection Link",
    "Email",
    "Phone No.",
    "Role",
];

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Invalid email")]
    InvalidEmail,
    #[error("data file {path} could not be read as a spreadsheet: {source}")]
    Spreadsheet {
        path: String,
        #[source]
        source: XlsxError,
    },
    #[error("data file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One contact in the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub name: String,
    pub company: String,
    pub connection_link: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    /// Cells under headers outside [`COLUMNS`], as `(header, value)` in sheet
    /// order.
    pub extra: Vec<(String, String)>,
}

impl Connection {
    /// Basic shape check: an email needs an `@` and a `.`.
    pub fn validate(&self) -> Result<(), RecordError> {
        if !self.email.contains('@') || !self.email.contains('.') {
            return Err(RecordError::InvalidEmail);
        }
        Ok(())
    }

    /// Case-insensitive substring match against every field.
    pub fn matches(&self, needle_lower: &str) -> bool {
        self.fields()
            .into_iter()
            .chain(self.extra.iter().map(|(_, value)| value.as_str()))
            .any(|field| field.to_lowercase().contains(needle_lower))
    }

    fn fields(&self) -> [&str; 6] {
        [
            self.name.as_str(),
            self.company.as_str(),
            self.connection_link.as_str(),
            self.email.as_str(),
            self.phone.as_deref().unwrap_or(""),
            self.role.as_str(),
        ]
    }

    /// Known fields followed by one cell per entry of `extra_columns`.
    /// Repeated header names take this record's extras in order.
    fn to_row(&self, extra_columns: &[String]) -> Vec<String> {
        let mut row: Vec<String> = self.fields().iter().map(|f| (*f).to_string()).collect();
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for column in extra_columns {
            let nth = seen.entry(column.as_str()).or_insert(0);
            let value = self
                .extra
                .iter()
                .filter(|(header, _)| header == column)
                .nth(*nth)
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            *nth += 1;
            row.push(value);
        }
        row
    }
}

/// Decoded sheet: unknown header columns plus the records.
struct Sheet {
    extra_columns: Vec<String>,
    records: Vec<Connection>,
}

/// Whole-file spreadsheet store for connection records.
pub struct RecordStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a header-only workbook if the data file is missing.
    pub fn ensure_initialized(&self) -> Result<bool, RecordError> {
        if self.path.try_exists()? {
            return Ok(false);
        }
        self.save(&[])?;
        tracing::info!(path = %self.path.display(), "Created empty data file");
        Ok(true)
    }

    /// Load every record.
    pub fn load(&self) -> Result<Vec<Connection>, RecordError> {
        Ok(self.read_sheet()?.records)
    }

    /// Overwrite the data file with `records`. Extra columns are taken from
    /// the records themselves.
    pub fn save(&self, records: &[Connection]) -> Result<(), RecordError> {
        self.write_sheet(&[], records)
    }

    fn read_sheet(&self) -> Result<Sheet, RecordError> {
        self.ensure_initialized()?;
        let bytes = std::fs::read(&self.path)?;
        let rows = read_first_sheet(&bytes).map_err(|source| self.spreadsheet_error(source))?;
        Ok(rows_to_sheet(rows))
    }

    /// Write `records` under the known columns, `extra_columns`, and any
    /// further extra headers the records carry.
    fn write_sheet(
        &self,
        extra_columns: &[String],
        records: &[Connection],
    ) -> Result<(), RecordError> {
        let extra_columns = merge_extra_columns(extra_columns, records);

        let mut rows: Vec<Vec<String>> = Vec::with_capacity(records.len() + 1);
        let mut header: Vec<String> = COLUMNS.iter().map(|c| (*c).to_string()).collect();
        header.extend(extra_columns.iter().cloned());
        rows.push(header);
        rows.extend(records.iter().map(|record| record.to_row(&extra_columns)));

        let bytes = write_workbook(&rows).map_err(|source| self.spreadsheet_error(source))?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<Option<Connection>, RecordError> {
        Ok(self.load()?.into_iter().nth(index))
    }

    /// Append a validated record. Returns its index.
    pub fn add(&self, record: Connection) -> Result<usize, RecordError> {
        record.validate()?;
        let _guard = self.write_lock.lock();
        let mut sheet = self.read_sheet()?;
        sheet.records.push(record);
        self.write_sheet(&sheet.extra_columns, &sheet.records)?;
        Ok(sheet.records.len() - 1)
    }

    /// Replace the record at `index`. Returns `false` (and writes nothing)
    /// when the index is out of range. A record without extras keeps the
    /// row's existing extra cells.
    pub fn update(&self, index: usize, mut record: Connection) -> Result<bool, RecordError> {
        record.validate()?;
        let _guard = self.write_lock.lock();
        let mut sheet = self.read_sheet()?;
        let Some(slot) = sheet.records.get_mut(index) else {
            return Ok(false);
        };
        if record.extra.is_empty() {
            record.extra = std::mem::take(&mut slot.extra);
        }
        *slot = record;
        self.write_sheet(&sheet.extra_columns, &sheet.records)?;
        Ok(true)
    }

    /// Records containing `query` in any field (case-insensitive), with
    /// their indices. A blank query returns everything.
    pub fn search(&self, query: &str) -> Result<Vec<(usize, Connection)>, RecordError> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .load()?
            .into_iter()
            .enumerate()
            .filter(|(_, record)| needle.is_empty() || record.matches(&needle))
            .collect())
    }

    /// Raw workbook bytes for download.
    pub fn read_bytes(&self) -> Result<Vec<u8>, RecordError> {
        self.ensure_initialized()?;
        Ok(std::fs::read(&self.path)?)
    }

    fn spreadsheet_error(&self, source: XlsxError) -> RecordError {
        RecordError::Spreadsheet {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Map sheet rows to records by header name. Blank rows are dropped; every
/// header position not claimed by [`COLUMNS`] becomes an extra column.
fn rows_to_sheet(rows: Vec<Vec<String>>) -> Sheet {
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Sheet {
            extra_columns: Vec::new(),
            records: Vec::new(),
        };
    };
    let rows: Vec<Vec<String>> = rows.collect();
    let indices = COLUMNS.map(|column| header.iter().position(|h| h.trim() == column));
    // Cells past the header row's end are kept under a blank header.
    let width = rows.iter().map(Vec::len).fold(header.len(), usize::max);
    let extra_positions: Vec<usize> = (0..width)
        .filter(|i| !indices.contains(&Some(*i)))
        .collect();
    let header_at = |i: usize| header.get(i).cloned().unwrap_or_default();
    let extra_columns = extra_positions.iter().map(|&i| header_at(i)).collect();

    let records = rows
        .into_iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            let cell = |col: usize| {
                indices[col]
                    .and_then(|i| row.get(i))
                    .cloned()
                    .unwrap_or_default()
            };
            let phone = cell(4);
            Connection {
                name: cell(0),
                company: cell(1),
                connection_link: cell(2),
                email: cell(3),
                phone: (!phone.is_empty()).then_some(phone),
                role: cell(5),
                extra: extra_positions
                    .iter()
                    .map(|&i| (header_at(i), row.get(i).cloned().unwrap_or_default()))
                    .collect(),
            }
        })
        .collect();

    Sheet {
        extra_columns,
        records,
    }
}

/// `base` plus enough further columns to hold every record's extras.
fn merge_extra_columns(base: &[String], records: &[Connection]) -> Vec<String> {
    let mut columns = base.to_vec();
    for record in records {
        for (name, _) in &record.extra {
            let have = columns.iter().filter(|c| *c == name).count();
            let need = record.extra.iter().filter(|(n, _)| n == name).count();
            columns.extend(std::iter::repeat_n(name.clone(), need.saturating_sub(have)));
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, RecordStore) {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::open(tmp.path().join("connections.xlsx"));
        (tmp, store)
    }

    fn sample(name: &str, company: &str, email: &str) -> Connection {
        Connection {
            name: name.into(),
            company: company.into(),
            connection_link: format!("https://example.com/in/{}", name.to_lowercase()),
            email: email.into(),
            phone: None,
            role: "Engineer".into(),
            extra: Vec::new(),
        }
    }

    #[test]
    fn load_creates_header_only_file() {
        let (_tmp, store) = test_store();
        assert!(store.load().unwrap().is_empty());
        assert!(store.path().exists());

        let rows = read_first_sheet(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], COLUMNS.to_vec());
    }

    #[test]
    fn add_then_get() {
        let (_tmp, store) = test_store();
        let mut record = sample("Ada", "Analytical", "ada@example.com");
        record.phone = Some("+44 20 7946 0000".into());

        assert_eq!(store.add(record.clone()).unwrap(), 0);
        assert_eq!(store.get(0).unwrap(), Some(record));
        assert_eq!(store.get(1).unwrap(), None);
    }

    #[test]
    fn add_rejects_invalid_email() {
        let (_tmp, store) = test_store();
        let err = store.add(sample("Bad", "Co", "no-at-sign.com")).unwrap_err();
        assert!(matches!(err, RecordError::InvalidEmail));
        assert_eq!(err.to_string(), "Invalid email");

        assert!(store.add(sample("Bad", "Co", "user@localhost")).is_err());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn update_replaces_row_in_place() {
        let (_tmp, store) = test_store();
        store.add(sample("Ada", "A", "ada@a.io")).unwrap();
        store.add(sample("Grace", "B", "grace@b.io")).unwrap();

        let replacement = sample("Grace Hopper", "Navy", "grace@navy.mil");
        assert!(store.update(1, replacement.clone()).unwrap());

        let records = store.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Ada");
        assert_eq!(records[1], replacement);
    }

    #[test]
    fn update_out_of_range_is_a_no_op() {
        let (_tmp, store) = test_store();
        store.add(sample("Ada", "A", "ada@a.io")).unwrap();
        let before = std::fs::read(store.path()).unwrap();

        assert!(!store.update(5, sample("X", "Y", "x@y.z")).unwrap());
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let (_tmp, store) = test_store();
        store.add(sample("Ada", "Analytical Engines", "ada@a.io")).unwrap();
        store.add(sample("Grace", "Navy", "grace@navy.mil")).unwrap();
        store.add(sample("Linus", "Kernel", "linus@kernel.org")).unwrap();

        let hits = store.search("NAVY").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[0].1.name, "Grace");

        // Matches on the link column too, and keeps row indices.
        let hits = store.search("in/linus").unwrap();
        assert_eq!(hits.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![2]);

        assert_eq!(store.search("").unwrap().len(), 3);
        assert_eq!(store.search("   ").unwrap().len(), 3);
        assert!(store.search("nobody").unwrap().is_empty());
    }

    #[test]
    fn columns_are_mapped_by_header_name() {
        let rows = vec![
            vec!["Role".into(), "Email".into(), "Name".into()],
            vec!["CTO".into(), "a@b.c".into(), "Ada".into()],
            vec![String::new(), String::new(), String::new()],
        ];
        let sheet = rows_to_sheet(rows);
        assert!(sheet.extra_columns.is_empty());
        let records = sheet.records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Ada");
        assert_eq!(records[0].email, "a@b.c");
        assert_eq!(records[0].role, "CTO");
        assert_eq!(records[0].company, "");
        assert_eq!(records[0].phone, None);
    }

    fn seed_with_notes_column(store: &RecordStore) {
        let rows = vec![
            vec![
                "Name", "Company", "Connection Link", "Email", "Phone No.", "Role", "Notes",
            ],
            vec!["Ada", "A", "", "ada@a.io", "", "CTO", "met at conf"],
        ];
        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .map(|r| r.into_iter().map(String::from).collect())
            .collect();
        std::fs::write(store.path(), write_workbook(&rows).unwrap()).unwrap();
    }

    fn sheet_rows(store: &RecordStore) -> Vec<Vec<String>> {
        read_first_sheet(&std::fs::read(store.path()).unwrap()).unwrap()
    }

    #[test]
    fn add_keeps_unknown_columns() {
        let (_tmp, store) = test_store();
        seed_with_notes_column(&store);

        store.add(sample("Grace", "Navy", "grace@navy.mil")).unwrap();

        let rows = sheet_rows(&store);
        assert_eq!(rows[0].last().map(String::as_str), Some("Notes"));
        assert_eq!(rows[0].len(), 7);
        assert_eq!(rows[1][6], "met at conf");
        assert_eq!(rows[2][0], "Grace");

        let records = store.load().unwrap();
        assert_eq!(
            records[0].extra,
            vec![("Notes".to_string(), "met at conf".to_string())]
        );
        assert_eq!(
            records[1].extra,
            vec![("Notes".to_string(), String::new())]
        );
    }

    #[test]
    fn update_keeps_row_extras() {
        let (_tmp, store) = test_store();
        seed_with_notes_column(&store);

        assert!(store.update(0, sample("Ada L", "A", "ada@a.io")).unwrap());

        let rows = sheet_rows(&store);
        assert_eq!(rows[0][6], "Notes");
        assert_eq!(rows[1][0], "Ada L");
        assert_eq!(rows[1][6], "met at conf");
    }

    #[test]
    fn cells_beyond_the_header_are_kept() {
        let (_tmp, store) = test_store();
        let header: Vec<String> = COLUMNS.iter().map(|c| (*c).to_string()).collect();
        let mut row = vec![String::new(); 7];
        row[0] = "Ada".into();
        row[3] = "ada@a.io".into();
        row[6] = "stray".into();
        std::fs::write(store.path(), write_workbook(&[header.clone(), row]).unwrap()).unwrap();

        store.add(sample("Grace", "Navy", "grace@navy.mil")).unwrap();

        let rows = sheet_rows(&store);
        assert_eq!(rows[0], header);
        assert_eq!(rows[1][6], "stray");
    }

    #[test]
    fn unknown_columns_are_searchable() {
        let (_tmp, store) = test_store();
        seed_with_notes_column(&store);
        assert_eq!(store.search("AT CONF").unwrap().len(), 1);
    }

    #[test]
    fn header_only_extra_column_survives_first_add() {
        let (_tmp, store) = test_store();
        let header: Vec<String> = COLUMNS
            .iter()
            .map(|c| (*c).to_string())
            .chain(["Tags".to_string()])
            .collect();
        std::fs::write(store.path(), write_workbook(&[header]).unwrap()).unwrap();

        store.add(sample("Ada", "A", "ada@a.io")).unwrap();
        assert_eq!(sheet_rows(&store)[0][6], "Tags");
    }

    #[test]
    fn save_writes_extras_carried_by_records() {
        let (_tmp, store) = test_store();
        let mut record = sample("Ada", "A", "ada@a.io");
        record.extra = vec![
            ("Notes".into(), "first".into()),
            ("Notes".into(), "second".into()),
        ];
        store.save(&[record.clone()]).unwrap();

        let rows = sheet_rows(&store);
        assert_eq!(&rows[0][6..], &["Notes", "Notes"]);
        assert_eq!(&rows[1][6..], &["first", "second"]);
        assert_eq!(store.load().unwrap(), vec![record]);
    }

    #[test]
    fn corrupt_data_file_is_reported() {
        let (_tmp, store) = test_store();
        std::fs::write(store.path(), b"not a workbook").unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            RecordError::Spreadsheet { .. }
        ));
    }

    #[test]
    fn read_bytes_returns_workbook() {
        let (_tmp, store) = test_store();
        store.add(sample("Ada", "A", "ada@a.io")).unwrap();
        let bytes = store.read_bytes().unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
