//! Parse functions - stream price paid CSV rows into PropertySaleRecord structs

use crate::error::IngestError;
use crate::ingestion::types::{Column, PropertySaleRecord, COLUMN_COUNT};
use crate::ingestion::utils::{normalize_transfer_date, parse_price, strip_braces};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::info;

/// Position of each logical column in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    positions: [usize; COLUMN_COUNT],
    width: usize,
}

impl ColumnMap {
    /// The published order, no extra columns
    pub fn standard() -> Self {
        let mut positions = [0; COLUMN_COUNT];
        for (i, position) in positions.iter_mut().enumerate() {
            *position = i;
        }
        Self {
            positions,
            width: COLUMN_COUNT,
        }
    }

    /// Explicit file order given as column names; unknown names are skipped columns
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        let mut positions = [usize::MAX; COLUMN_COUNT];

        for (file_index, name) in names.iter().enumerate() {
            if let Some(column) = Column::from_name(name.as_ref()) {
                positions[column.index()] = file_index;
            }
        }

        let missing: Vec<String> = Column::ALL
            .iter()
            .filter(|c| positions[c.index()] == usize::MAX)
            .map(|c| format!("{:?}", c))
            .collect();
        if !missing.is_empty() {
            return Err(format!("column mapping is missing {}", missing.join(", ")));
        }

        Ok(Self {
            positions,
            width: names.len(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn field<'r>(&self, row: &'r csv::StringRecord, column: Column) -> &'r str {
        row.get(self.positions[column.index()]).unwrap_or("")
    }
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub has_headers: bool,
    pub columns: ColumnMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Follows field quoting over the raw bytes the CSV reader consumes, since
/// the reader itself accepts a quoted field left open at end of input
struct QuoteTracker<R> {
    inner: R,
    state: QuoteState,
    eof: bool,
}

impl<R: Read> QuoteTracker<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            state: QuoteState::FieldStart,
            eof: false,
        }
    }

    fn unterminated(&self) -> bool {
        self.eof && self.state == QuoteState::Quoted
    }

    fn advance(&mut self, byte: u8) {
        self.state = match (self.state, byte) {
            (QuoteState::Quoted, b'"') => QuoteState::QuoteInQuoted,
            (QuoteState::Quoted, _) => QuoteState::Quoted,
            // doubled quote is an escape
            (QuoteState::QuoteInQuoted, b'"') => QuoteState::Quoted,
            (_, b',' | b'\n' | b'\r') => QuoteState::FieldStart,
            (QuoteState::FieldStart, b'"') => QuoteState::Quoted,
            _ => QuoteState::Unquoted,
        };
    }
}

impl<R: Read> Read for QuoteTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof = true;
        }
        for &byte in &buf[..n] {
            self.advance(byte);
        }
        Ok(n)
    }
}

/// Lazy, single-pass reader of price paid rows
pub struct RecordReader<R: Read> {
    reader: csv::Reader<QuoteTracker<R>>,
    columns: ColumnMap,
    row: csv::StringRecord,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(input: R, options: ParseOptions) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(options.has_headers)
            .delimiter(b',')
            .quote(b'"')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(QuoteTracker::new(input));

        Self {
            reader,
            columns: options.columns,
            row: csv::StringRecord::new(),
            failed: false,
        }
    }

    fn read_next(&mut self) -> Result<Option<PropertySaleRecord>, IngestError> {
        loop {
            let more = self.reader.read_record(&mut self.row)?;
            if self.reader.get_ref().unterminated() {
                return Err(IngestError::ParseFailed {
                    line: self.reader.position().line(),
                    message: "unterminated quoted field at end of input".to_string(),
                });
            }
            if !more {
                return Ok(None);
            }

            // blank lines
            if self.row.len() == 1 && self.row.get(0).map_or(true, str::is_empty) {
                continue;
            }

            if self.row.len() != self.columns.width() {
                let line = self.row.position().map(|p| p.line()).unwrap_or(0);
                return Err(IngestError::ParseFailed {
                    line,
                    message: format!(
                        "expected {} columns, found {}",
                        self.columns.width(),
                        self.row.len()
                    ),
                });
            }

            return Ok(Some(record_from_row(&self.row, &self.columns)));
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<PropertySaleRecord, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_next() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Per-row transform; never fails
fn record_from_row(row: &csv::StringRecord, columns: &ColumnMap) -> PropertySaleRecord {
    let text = |column: Column| columns.field(row, column).to_string();

    PropertySaleRecord {
        id: strip_braces(columns.field(row, Column::Id)),
        price: parse_price(columns.field(row, Column::Price)),
        transfer_date: normalize_transfer_date(columns.field(row, Column::TransferDate)),
        postcode: text(Column::Postcode),
        property_type: text(Column::PropertyType),
        is_new_build: text(Column::IsNewBuild),
        duration: text(Column::Duration),
        paon: text(Column::Paon),
        saon: text(Column::Saon),
        street: text(Column::Street),
        locality: text(Column::Locality),
        town: text(Column::Town),
        district: text(Column::District),
        county: text(Column::County),
        category: text(Column::Category),
        status: text(Column::Status),
    }
}

/// Open a CSV file, decompressing `.gz` transparently
pub fn open_records(
    path: &Path,
    options: ParseOptions,
) -> Result<RecordReader<Box<dyn Read + Send>>, IngestError> {
    info!("Parsing price paid CSV from {:?}", path);

    let file = BufReader::new(File::open(path)?);
    let input: Box<dyn Read + Send> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    Ok(RecordReader::new(input, options))
}

/// Full structural pass over a file; returns the row count
pub fn validate_file(path: &Path, options: ParseOptions) -> Result<u64, IngestError> {
    let mut rows = 0u64;
    for record in open_records(path, options)? {
        record?;
        rows += 1;
    }
    info!("Validated {} rows in {:?}", rows, path);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ROW_1: &str = r#""{1}","100000","2021-01-01 00:00","SW1A 1AA","T","N","F","10","","DOWNING STREET","","LONDON","CITY OF WESTMINSTER","GREATER LONDON","A","A""#;
    const ROW_2: &str = r#""{2}","invalid","2021-02-01 00:00","SW1A 2AA","F","Y","L","5","FLAT 1","WHITEHALL","","LONDON","CITY OF WESTMINSTER","GREATER LONDON","B","C""#;

    fn parse_all(input: &str) -> Vec<Result<PropertySaleRecord, IngestError>> {
        RecordReader::new(input.as_bytes(), ParseOptions::default()).collect()
    }

    #[test]
    fn test_parses_standard_rows() {
        let input = format!("{}\n{}\n", ROW_1, ROW_2);
        let records: Vec<_> = parse_all(&input).into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[0].price, 100_000);
        assert_eq!(records[0].transfer_date, "2021-01-01");
        assert_eq!(records[0].postcode, "SW1A 1AA");
        assert_eq!(records[0].saon, "");
        assert_eq!(records[0].street, "DOWNING STREET");
        assert_eq!(records[1].saon, "FLAT 1");
        assert_eq!(records[1].status, "C");
    }

    #[test]
    fn test_unparseable_price_becomes_zero() {
        let records = parse_all(ROW_2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().price, 0);
    }

    #[test]
    fn test_wrong_column_count_is_fatal() {
        let input = format!("{}\n\"3\",\"5\",\"2021-01-01\"\n{}\n", ROW_1, ROW_2);
        let results = parse_all(&input);

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(IngestError::ParseFailed { line, message }) => {
                assert_eq!(*line, 2);
                assert!(message.contains("found 3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_quote_at_end_is_fatal() {
        let truncated = &ROW_1[..ROW_1.len() - 1];
        let input = format!("{}\n{}", ROW_2, truncated);
        let results = parse_all(&input);

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(IngestError::ParseFailed { message, .. }) => {
                assert!(message.contains("unterminated"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_escaped_quotes_are_not_unterminated() {
        let row = r#""{7}","180000","2018-07-07","B1 1AA","T","N","F","THE ""OLD"" FORGE","","HIGH STREET","","BIRMINGHAM","BIRMINGHAM","WEST MIDLANDS","A","A""#;
        let records = parse_all(row);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().paon, "THE \"OLD\" FORGE");
    }

    #[test]
    fn test_validate_rejects_truncated_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("truncated.csv");
        let mut file = File::create(&path).unwrap();
        write!(file, "{}\n{}", ROW_1, &ROW_2[..ROW_2.len() - 1]).unwrap();

        let result = validate_file(&path, ParseOptions::default());
        assert!(matches!(result, Err(IngestError::ParseFailed { .. })));
    }

    #[test]
    fn test_skips_blank_lines() {
        let input = format!("{}\n\n{}\n", ROW_1, ROW_2);
        assert_eq!(parse_all(&input).len(), 2);
    }

    #[test]
    fn test_tolerates_interior_quotes() {
        let row = r#"{9},250000,2020-05-05,E1 6AN,F,N,L,"THE "OLD" MILL",,MILL LANE,,LONDON,TOWER HAMLETS,GREATER LONDON,A,A"#;
        let records = parse_all(row);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.id, "9");
        assert!(record.paon.contains("OLD"));
        assert_eq!(record.street, "MILL LANE");
    }

    #[test]
    fn test_explicit_column_map_with_header() {
        let input = "price,id,date,postcode,property_type,is_new_build,duration,paon,saon,street,locality,town,district,county,category,status\n\
                     95000,abc,2019-03-03,N1 9GU,T,N,F,4,,CALEDONIAN ROAD,,LONDON,ISLINGTON,GREATER LONDON,A,A\n";
        let columns = ColumnMap::from_names(&[
            "price", "id", "date", "postcode", "property_type", "is_new_build", "duration",
            "paon", "saon", "street", "locality", "town", "district", "county", "category",
            "status",
        ])
        .unwrap();

        let records: Vec<_> = RecordReader::new(
            input.as_bytes(),
            ParseOptions {
                has_headers: true,
                columns,
            },
        )
        .collect();

        let record = records[0].as_ref().unwrap();
        assert_eq!(record.id, "abc");
        assert_eq!(record.price, 95_000);
        assert_eq!(record.district, "ISLINGTON");
    }

    #[test]
    fn test_column_map_requires_every_column() {
        let err = ColumnMap::from_names(&["id", "price"]).unwrap_err();
        assert!(err.contains("Status"));
    }

    #[test]
    fn test_reads_gzipped_file() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("update.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        writeln!(encoder, "{}", ROW_1).unwrap();
        encoder.finish().unwrap();

        assert_eq!(validate_file(&path, ParseOptions::default()).unwrap(), 1);
    }
}
