//! CSV Exchange
//!
//! Export writes every case, newest first, as UTF-8 with a byte order mark so
//! spreadsheet tools pick the right encoding. Import accepts the export's own
//! headers as well as the column names of the older Portuguese-language
//! tables, and routes each row through
//! [`RncAllocator::insert_with_requested_number`]: a free number in the file
//! is kept, a blank or taken one is replaced by a fresh allocation.

use chrono::NaiveDateTime;
use rnc_allocator::RncAllocator;
use rnc_core::{CaseRecord, NewCase, RncResult, Timestamp, ValidationError};
use rnc_storage::CaseStore;
use serde::Serialize;

use crate::auth::QualityAccess;
use std::collections::HashMap;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Timestamp layout used in exported files.
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header row of an export, in column order.
pub const EXPORT_COLUMNS: [&str; 30] = [
    "id",
    "rnc_number",
    "reported_at",
    "issuer",
    "area",
    "pep",
    "title",
    "responsible",
    "description",
    "references",
    "causer",
    "process",
    "origin",
    "severity",
    "category",
    "actions",
    "action_owner",
    "status",
    "closed_at",
    "closed_by",
    "closure_notes",
    "closure_description",
    "effectiveness",
    "reopened_at",
    "reopened_by",
    "reopen_reason",
    "reopen_description",
    "cancelled_at",
    "cancelled_by",
    "cancel_reason",
];

/// Legacy header names and the export column each one stands for.
const LEGACY_ALIASES: [(&str, &str); 29] = [
    ("data", "reported_at"),
    ("rnc_num", "rnc_number"),
    ("emitente", "issuer"),
    ("area", "area"),
    ("pep", "pep"),
    ("titulo", "title"),
    ("responsavel", "responsible"),
    ("descricao", "description"),
    ("referencias", "references"),
    ("causador", "causer"),
    ("processo_envolvido", "process"),
    ("origem", "origin"),
    ("severidade", "severity"),
    ("categoria", "category"),
    ("acoes", "actions"),
    ("responsavel_acao", "action_owner"),
    ("status", "status"),
    ("encerrada_em", "closed_at"),
    ("encerrada_por", "closed_by"),
    ("encerramento_obs", "closure_notes"),
    ("encerramento_desc", "closure_description"),
    ("eficacia", "effectiveness"),
    ("reaberta_em", "reopened_at"),
    ("reaberta_por", "reopened_by"),
    ("reabertura_motivo", "reopen_reason"),
    ("reabertura_desc", "reopen_description"),
    ("cancelada_em", "cancelled_at"),
    ("cancelada_por", "cancelled_by"),
    ("cancelamento_motivo", "cancel_reason"),
];

/// Layouts accepted in date cells, tried in order.
const DATE_TIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

// ============================================================================
// EXPORT
// ============================================================================

/// Export every stored case.
pub async fn export_cases(store: &dyn CaseStore) -> RncResult<Vec<u8>> {
    let cases = store.case_list().await?;
    let bytes = render_cases(&cases)?;
    tracing::info!(cases = cases.len(), bytes = bytes.len(), "Cases exported");
    Ok(bytes)
}

/// Render `cases` in the order given.
pub fn render_cases(cases: &[CaseRecord]) -> RncResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    writer.write_record(EXPORT_COLUMNS).map_err(csv_failure)?;
    for case in cases {
        writer.write_record(export_row(case)).map_err(csv_failure)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv_failure(e.into_error().into()))
}

fn export_row(case: &CaseRecord) -> [String; 30] {
    let fields = &case.fields;
    let closure = case.closure.as_ref();
    let reopening = case.reopening.as_ref();
    let cancellation = case.cancellation.as_ref();

    [
        case.id.to_string(),
        case.rnc_number.clone(),
        timestamp_cell(fields.reported_at),
        text_cell(&fields.issuer),
        text_cell(&fields.area),
        text_cell(&fields.pep),
        text_cell(&fields.title),
        text_cell(&case.responsible),
        text_cell(&fields.description),
        text_cell(&fields.references),
        text_cell(&fields.causer),
        text_cell(&fields.process),
        text_cell(&fields.origin),
        text_cell(&fields.severity),
        text_cell(&fields.category),
        text_cell(&case.actions),
        text_cell(&case.action_owner),
        case.status.as_db_str().to_string(),
        timestamp_cell(closure.map(|c| c.at)),
        closure.map(|c| c.by.clone()).unwrap_or_default(),
        closure.map(|c| c.notes.clone()).unwrap_or_default(),
        closure.map(|c| c.description.clone()).unwrap_or_default(),
        closure
            .map(|c| c.effectiveness.as_db_str().to_string())
            .unwrap_or_default(),
        timestamp_cell(reopening.map(|r| r.at)),
        reopening.map(|r| r.by.clone()).unwrap_or_default(),
        reopening.map(|r| r.reason.clone()).unwrap_or_default(),
        reopening.map(|r| r.description.clone()).unwrap_or_default(),
        timestamp_cell(cancellation.map(|c| c.at)),
        cancellation.map(|c| c.by.clone()).unwrap_or_default(),
        cancellation.map(|c| c.reason.clone()).unwrap_or_default(),
    ]
}

fn text_cell(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn timestamp_cell(value: Option<Timestamp>) -> String {
    value
        .map(|at| at.format(EXPORT_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

// ============================================================================
// IMPORT
// ============================================================================

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Rows stored.
    pub inserted: usize,
    /// Rows among `inserted` that received a freshly allocated number.
    pub auto_numbered: usize,
}

/// One parsed data row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    pub rnc_number: Option<String>,
    pub case: NewCase,
}

/// Import every row of `bytes`.
///
/// Rows are stored one by one; a store failure stops the import and leaves
/// the rows before it in place.
#[tracing::instrument(skip(allocator, _access, bytes), fields(bytes = bytes.len()))]
pub async fn import_cases(
    allocator: &RncAllocator,
    _access: &QualityAccess,
    bytes: &[u8],
) -> RncResult<ImportReport> {
    let rows = parse_import(bytes)?;
    let mut report = ImportReport::default();
    for row in rows {
        let imported = allocator
            .insert_with_requested_number(row.rnc_number.as_deref(), &row.case)
            .await?;
        report.inserted += 1;
        if imported.auto_numbered {
            report.auto_numbered += 1;
        }
    }
    tracing::info!(
        inserted = report.inserted,
        auto_numbered = report.auto_numbered,
        "Import finished"
    );
    Ok(report)
}

/// Parse an import file without touching the store.
///
/// Only the number and the fields of a new case are taken from a row;
/// lifecycle columns are recognised but imported cases always start `Open`.
pub fn parse_import(bytes: &[u8]) -> RncResult<Vec<ImportRow>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(bytes))
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers().map_err(csv_failure)?.clone();
    let columns = map_columns(&headers);
    if columns.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "csv".to_string(),
            reason: "no recognised column in header".to_string(),
        }
        .into());
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_failure)?;
        let cell = |name: &str| -> Option<String> {
            columns
                .get(name)
                .and_then(|&index| record.get(index))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        rows.push(ImportRow {
            rnc_number: cell("rnc_number"),
            case: NewCase {
                reported_at: cell("reported_at").as_deref().and_then(parse_timestamp),
                issuer: cell("issuer"),
                area: cell("area"),
                pep: cell("pep"),
                title: cell("title"),
                description: cell("description"),
                references: cell("references"),
                causer: cell("causer"),
                process: cell("process"),
                origin: cell("origin"),
                severity: cell("severity"),
                category: cell("category"),
            },
        });
    }
    Ok(rows)
}

/// `;` when the header line uses it and has no `,`; `,` otherwise.
fn detect_delimiter(bytes: &[u8]) -> u8 {
    let header = bytes.split(|&b| b == b'\n').next().unwrap_or_default();
    if header.contains(&b';') && !header.contains(&b',') {
        b';'
    } else {
        b','
    }
}

/// Export column name to field index. `id` and unknown headers are dropped.
fn map_columns(headers: &csv::StringRecord) -> HashMap<&'static str, usize> {
    let mut columns = HashMap::new();
    for (index, header) in headers.iter().enumerate() {
        if let Some(name) = canonical_column(header) {
            columns.entry(name).or_insert(index);
        }
    }
    columns
}

fn canonical_column(header: &str) -> Option<&'static str> {
    let header = header.trim().to_lowercase();
    if header == "id" {
        return None;
    }
    EXPORT_COLUMNS
        .iter()
        .copied()
        .find(|column| *column == header)
        .or_else(|| {
            LEGACY_ALIASES
                .iter()
                .find(|(alias, _)| *alias == header)
                .map(|(_, column)| *column)
        })
}

/// Read a date cell. Blank or unreadable values yield `None`.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS.iter().find_map(|format| {
                chrono::NaiveDate::parse_from_str(value, format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
        })
}

fn csv_failure(err: csv::Error) -> rnc_core::RncError {
    ValidationError::InvalidValue {
        field: "csv".to_string(),
        reason: err.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rnc_core::{CaseId, CaseStatus, Closure, Effectiveness};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_render_starts_with_bom_and_header() {
        let bytes = render_cases(&[]).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text.trim_end(), EXPORT_COLUMNS.join(","));
    }

    #[test]
    fn test_render_row_formats_timestamps_and_sections() {
        let mut case = CaseRecord::opened(
            CaseId::new(3),
            "2025-003",
            NewCase {
                reported_at: Some(at(2025, 3, 14, 9, 30, 0)),
                title: Some("Solda, fora de tolerância".to_string()),
                ..Default::default()
            },
        );
        case.status = CaseStatus::Closed;
        case.closure = Some(Closure {
            at: at(2025, 4, 1, 17, 5, 9),
            by: "qa".to_string(),
            notes: String::new(),
            description: String::new(),
            effectiveness: Effectiveness::Effective,
        });

        let row = export_row(&case);
        assert_eq!(row[0], "3");
        assert_eq!(row[1], "2025-003");
        assert_eq!(row[2], "2025-03-14 09:30:00");
        assert_eq!(row[17], "closed");
        assert_eq!(row[18], "2025-04-01 17:05:09");
        assert_eq!(row[22], "effective");
        assert_eq!(row[23], "");

        let bytes = render_cases(&[case]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Solda, fora de tolerância\""));
    }

    #[test]
    fn test_parse_export_headers() {
        let csv = "id,rnc_number,title,reported_at\n9,2024-010,Burr on flange,2024-05-02 08:00:00\n";
        let rows = parse_import(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rnc_number.as_deref(), Some("2024-010"));
        assert_eq!(rows[0].case.title.as_deref(), Some("Burr on flange"));
        assert_eq!(rows[0].case.reported_at, Some(at(2024, 5, 2, 8, 0, 0)));
    }

    #[test]
    fn test_parse_legacy_headers_with_semicolons_and_bom() {
        let csv = "\u{FEFF}RNC_NUM;Data;Emitente;Titulo;Severidade\n 2023-007 ;14/03/2023;Ana;Trinca;Alta\n;;;Sem número;\n";
        let rows = parse_import(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].rnc_number.as_deref(), Some("2023-007"));
        assert_eq!(rows[0].case.reported_at, Some(at(2023, 3, 14, 0, 0, 0)));
        assert_eq!(rows[0].case.issuer.as_deref(), Some("Ana"));
        assert_eq!(rows[0].case.severity.as_deref(), Some("Alta"));

        assert_eq!(rows[1].rnc_number, None);
        assert_eq!(rows[1].case.title.as_deref(), Some("Sem número"));
    }

    #[test]
    fn test_parse_ignores_unknown_and_id_columns() {
        let csv = "id,foo,area\n1,bar,Pintura\n";
        let rows = parse_import(csv.as_bytes()).unwrap();
        assert_eq!(rows[0].case.area.as_deref(), Some("Pintura"));
        assert_eq!(rows[0].rnc_number, None);
    }

    #[test]
    fn test_parse_rejects_file_without_known_columns() {
        let csv = "id,foo,bar\n1,2,3\n";
        let err = parse_import(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            rnc_core::RncError::Validation(ValidationError::InvalidValue { ref field, .. }) if field == "csv"
        ));
    }

    #[test]
    fn test_unreadable_dates_become_none() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("ontem"), None);
        assert_eq!(parse_timestamp("2025-13-40"), None);
        assert_eq!(
            parse_timestamp("2025-01-02T03:04:05"),
            Some(at(2025, 1, 2, 3, 4, 5))
        );
        assert_eq!(
            parse_timestamp("2025-01-02 03:04:05.250"),
            NaiveDate::from_ymd_opt(2025, 1, 2)
                .and_then(|d| d.and_hms_milli_opt(3, 4, 5, 250))
        );
    }

    #[test]
    fn test_delimiter_detection() {
        assert_eq!(detect_delimiter(b"a;b;c\n1,5;2;3"), b';');
        assert_eq!(detect_delimiter(b"a,b;c\n"), b',');
        assert_eq!(detect_delimiter(b"a,b,c"), b',');
        assert_eq!(detect_delimiter(b""), b',');
    }

    #[test]
    fn test_export_then_parse_keeps_case_fields() {
        let case = CaseRecord::opened(
            CaseId::new(1),
            "2025-001",
            NewCase {
                reported_at: Some(at(2025, 6, 1, 10, 0, 0)),
                issuer: Some("Bruno".to_string()),
                pep: Some("P-100".to_string()),
                description: Some("linha 1\nlinha 2".to_string()),
                ..Default::default()
            },
        );
        let bytes = render_cases(std::slice::from_ref(&case)).unwrap();
        let rows = parse_import(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rnc_number.as_deref(), Some("2025-001"));
        assert_eq!(rows[0].case, case.fields);
    }
}
