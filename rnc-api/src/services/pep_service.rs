//! PEP Service
//!
//! The catalogue of project codes (PEPs) offered when a case is opened.

use rnc_core::RncResult;
use rnc_storage::{CaseStore, InsertOutcome};
use serde::Serialize;

/// Outcome of a bulk add.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PepImport {
    pub added: usize,
    pub already_present: usize,
}

/// Add every non-blank code. Codes already in the catalogue are counted, not
/// treated as failures; any other store error stops the run.
pub async fn add_peps<I, S>(store: &dyn CaseStore, codes: I) -> RncResult<PepImport>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = PepImport::default();
    for code in codes {
        let code = code.as_ref().trim();
        if code.is_empty() {
            continue;
        }
        match store.pep_insert(code).await? {
            InsertOutcome::Inserted => report.added += 1,
            InsertOutcome::AlreadyExists => report.already_present += 1,
        }
    }
    tracing::info!(
        added = report.added,
        already_present = report.already_present,
        "PEPs added"
    );
    Ok(report)
}

pub async fn list_peps(store: &dyn CaseStore) -> RncResult<Vec<String>> {
    store.pep_list().await
}

/// One code per non-blank line, trimmed. The whole line is the code, so
/// free-form `code - description` entries are kept as typed.
pub fn parse_pep_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Codes from an uploaded file: the `code` column when the header has one,
/// otherwise the first cell of every line.
pub fn parse_pep_csv(bytes: &[u8]) -> Vec<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records().filter_map(Result::ok);
    let Some(first) = records.next() else {
        return Vec::new();
    };
    let code_column = first
        .iter()
        .position(|cell| cell.trim().eq_ignore_ascii_case("code"));

    let pick = |record: &csv::StringRecord| -> Option<String> {
        record
            .get(code_column.unwrap_or(0))
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .map(str::to_string)
    };

    let mut codes = Vec::new();
    if code_column.is_none() {
        codes.extend(pick(&first));
    }
    codes.extend(records.filter_map(|record| pick(&record)));
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rnc_storage::InMemoryStore;

    #[tokio::test]
    async fn test_add_peps_counts_existing_and_skips_blanks() {
        let store = InMemoryStore::new();
        store.pep_insert("P-100").await.unwrap();

        let report = add_peps(&store, ["P-100", "  ", "P-200", " P-300 ", "P-200"])
            .await
            .unwrap();
        assert_eq!(
            report,
            PepImport {
                added: 2,
                already_present: 2
            }
        );
        assert_eq!(
            list_peps(&store).await.unwrap(),
            vec!["P-100", "P-200", "P-300"]
        );
    }

    #[test]
    fn test_parse_pep_lines() {
        let text = "P-100 - Linha A\n\n   \n  P-200\r\nP-300";
        assert_eq!(
            parse_pep_lines(text),
            vec!["P-100 - Linha A", "P-200", "P-300"]
        );
    }

    #[test]
    fn test_parse_pep_csv_with_code_column() {
        let csv = "id,code\n1,P-100\n2,\n3,P-200\n";
        assert_eq!(parse_pep_csv(csv.as_bytes()), vec!["P-100", "P-200"]);
    }

    #[test]
    fn test_parse_pep_csv_without_header() {
        let csv = "\u{FEFF}P-100,Linha A\nP-200\n\n";
        assert_eq!(parse_pep_csv(csv.as_bytes()), vec!["P-100", "P-200"]);
    }
}
