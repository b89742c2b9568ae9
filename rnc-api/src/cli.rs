//! Command-line schema and dispatch for the `rnc` binary.

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rnc_core::{
    CancelCase, CaseId, CloseCase, Effectiveness, NewCase, ReopenCase, Timestamp, WallClock,
};
use rnc_storage::CaseStore;

use crate::error::{ApiError, ApiResult};
use crate::services;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "rnc")]
#[command(about = "Register of non-conformance reports (RNC)")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the tables if missing and report the backend in use
    Init,
    /// Open a new case under the next RNC number
    New {
        #[command(flatten)]
        quality: QualityArgs,
        #[command(flatten)]
        case: NewCaseArgs,
    },
    /// Show the number the next case would most likely receive
    Preview {
        /// Year to preview (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,
    },
    /// List cases, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print one case as JSON
    Show { id: CaseId },
    /// Close an open or reopened case
    Close {
        id: CaseId,
        #[command(flatten)]
        quality: QualityArgs,
        #[arg(long)]
        by: String,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long, default_value = "")]
        description: String,
        /// pending, effective or not_effective
        #[arg(long, default_value = "pending", value_parser = parse_effectiveness)]
        effectiveness: Effectiveness,
    },
    /// Reopen a closed case
    Reopen {
        id: CaseId,
        #[command(flatten)]
        quality: QualityArgs,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Cancel a case
    Cancel {
        id: CaseId,
        #[command(flatten)]
        quality: QualityArgs,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
    },
    /// Delete a case permanently
    Delete {
        id: CaseId,
        #[command(flatten)]
        quality: QualityArgs,
        /// Type CONFIRMAR to proceed
        #[arg(long)]
        confirm: String,
    },
    /// Import cases from a CSV file
    Import {
        file: PathBuf,
        #[command(flatten)]
        quality: QualityArgs,
    },
    /// Export every case as CSV
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage the PEP catalogue
    Pep {
        #[command(subcommand)]
        action: PepAction,
    },
}

/// PEP catalogue subcommands.
#[derive(Subcommand, Debug)]
pub enum PepAction {
    /// Add codes given as arguments and/or read from a file
    Add {
        codes: Vec<String>,
        /// CSV with a `code` column, or one code per line
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List the catalogue
    List,
}

/// Password typed by a quality team member.
#[derive(Args, Debug)]
pub struct QualityArgs {
    #[arg(long, env = "RNC_QUALITY_LOGIN", hide_env_values = true)]
    pub password: String,
}

/// Fields of a new case.
#[derive(Args, Debug, Default)]
pub struct NewCaseArgs {
    /// When the problem was found (defaults to now)
    #[arg(long, value_parser = parse_reported_at)]
    pub reported_at: Option<Timestamp>,
    #[arg(long)]
    pub issuer: Option<String>,
    #[arg(long)]
    pub area: Option<String>,
    #[arg(long)]
    pub pep: Option<String>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub references: Option<String>,
    #[arg(long)]
    pub causer: Option<String>,
    #[arg(long)]
    pub process: Option<String>,
    #[arg(long)]
    pub origin: Option<String>,
    #[arg(long)]
    pub severity: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
}

impl NewCaseArgs {
    fn into_new_case(self, now: Timestamp) -> NewCase {
        NewCase {
            reported_at: Some(self.reported_at.unwrap_or(now)),
            issuer: self.issuer,
            area: self.area,
            pep: self.pep,
            title: self.title,
            description: self.description,
            references: self.references,
            causer: self.causer,
            process: self.process,
            origin: self.origin,
            severity: self.severity,
            category: self.category,
        }
    }
}

fn parse_effectiveness(value: &str) -> Result<Effectiveness, String> {
    match value.trim().to_lowercase().as_str() {
        "pending" => Ok(Effectiveness::Pending),
        "effective" => Ok(Effectiveness::Effective),
        "not_effective" | "not-effective" => Ok(Effectiveness::NotEffective),
        other => Err(format!(
            "unknown effectiveness '{}': expected pending, effective or not_effective",
            other
        )),
    }
}

fn parse_reported_at(value: &str) -> Result<Timestamp, String> {
    services::parse_timestamp(value)
        .ok_or_else(|| format!("cannot read '{}' as a date (try YYYY-MM-DD HH:MM)", value))
}

// ============================================================================
// DISPATCH
// ============================================================================

impl Cli {
    /// Run the parsed command against `state`, writing results to `out`.
    pub async fn execute(self, state: &AppState, out: &mut dyn Write) -> ApiResult<()> {
        let store = state.store();
        let clock = state.clock();

        match self.command {
            Command::Init => {
                writeln!(out, "Schema ready on {} backend", store.backend())?;
            }
            Command::New { quality, case } => {
                let access = state.gate.authenticate(&quality.password)?;
                let case = case.into_new_case(clock.now());
                let allocation = services::create_case(&state.allocator, &access, &case).await?;
                writeln!(
                    out,
                    "RNC {} opened (id {})",
                    allocation.rnc_number, allocation.case_id
                )?;
            }
            Command::Preview { year } => {
                let number = match year {
                    Some(year) => state.allocator.preview_next(year).await?,
                    None => state.allocator.preview_current().await?,
                };
                writeln!(out, "{}", number)?;
            }
            Command::List { json } => {
                let cases = services::list_cases(store).await?;
                if json {
                    writeln!(out, "{}", serde_json::to_string_pretty(&cases)?)?;
                } else {
                    for case in &cases {
                        writeln!(
                            out,
                            "{:>6}  {:<10}  {:<9}  {}",
                            case.id.to_string(),
                            case.rnc_number,
                            case.status.as_db_str(),
                            case.fields.title.as_deref().unwrap_or("")
                        )?;
                    }
                }
            }
            Command::Show { id } => {
                let case = services::get_case(store, id).await?;
                writeln!(out, "{}", serde_json::to_string_pretty(&case)?)?;
            }
            Command::Close {
                id,
                quality,
                by,
                notes,
                description,
                effectiveness,
            } => {
                let access = state.gate.authenticate(&quality.password)?;
                let request = CloseCase {
                    by,
                    notes,
                    description,
                    effectiveness,
                };
                let case = services::close_case(store, clock, &access, id, request).await?;
                writeln!(out, "RNC {} closed", case.rnc_number)?;
            }
            Command::Reopen {
                id,
                quality,
                by,
                reason,
                description,
            } => {
                let access = state.gate.authenticate(&quality.password)?;
                let request = ReopenCase {
                    by,
                    reason,
                    description,
                };
                let case = services::reopen_case(store, clock, &access, id, request).await?;
                writeln!(out, "RNC {} reopened", case.rnc_number)?;
            }
            Command::Cancel {
                id,
                quality,
                by,
                reason,
            } => {
                let access = state.gate.authenticate(&quality.password)?;
                let request = CancelCase { by, reason };
                let case = services::cancel_case(store, clock, &access, id, request).await?;
                writeln!(out, "RNC {} cancelled", case.rnc_number)?;
            }
            Command::Delete {
                id,
                quality,
                confirm,
            } => {
                let access = state.gate.authenticate(&quality.password)?;
                services::delete_case(store, &access, id, &confirm).await?;
                writeln!(out, "Case {} deleted", id)?;
            }
            Command::Import { file, quality } => {
                let access = state.gate.authenticate(&quality.password)?;
                let bytes = std::fs::read(&file).map_err(|e| ApiError::file_error(&file, e))?;
                let report = services::import_cases(&state.allocator, &access, &bytes).await?;
                writeln!(
                    out,
                    "Imported {} row(s); {} RNC number(s) generated automatically",
                    report.inserted, report.auto_numbered
                )?;
            }
            Command::Export { output } => {
                let bytes = services::export_cases(store).await?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, &bytes).map_err(|e| ApiError::file_error(&path, e))?
                    }
                    None => out.write_all(&bytes)?,
                }
            }
            Command::Pep { action } => match action {
                PepAction::Add { codes, file } => {
                    let mut all = codes;
                    if let Some(path) = file {
                        let bytes =
                            std::fs::read(&path).map_err(|e| ApiError::file_error(&path, e))?;
                        all.extend(services::parse_pep_csv(&bytes));
                    }
                    if all.is_empty() {
                        return Err(ApiError::invalid_input("No PEP codes given"));
                    }
                    let report = services::add_peps(store, &all).await?;
                    writeln!(
                        out,
                        "{} PEP(s) added, {} already present",
                        report.added, report.already_present
                    )?;
                }
                PepAction::List => {
                    for code in services::list_peps(store).await? {
                        writeln!(out, "{}", code)?;
                    }
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_schema_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_close_command() {
        let cli = Cli::try_parse_from([
            "rnc",
            "close",
            "12",
            "--password",
            "q",
            "--by",
            "qa.lead",
            "--effectiveness",
            "not_effective",
        ])
        .unwrap();
        match cli.command {
            Command::Close {
                id,
                quality,
                by,
                effectiveness,
                ..
            } => {
                assert_eq!(id, CaseId::new(12));
                assert_eq!(quality.password, "q");
                assert_eq!(by, "qa.lead");
                assert_eq!(effectiveness, Effectiveness::NotEffective);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(Cli::try_parse_from(["rnc", "show", "abc"]).is_err());
        assert!(Cli::try_parse_from([
            "rnc", "close", "1", "--password", "q", "--by", "x", "--effectiveness", "great"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["rnc", "new", "--reported-at", "yesterday"]).is_err());
    }

    #[test]
    fn test_new_and_import_require_password() {
        assert!(Cli::try_parse_from(["rnc", "new", "--title", "t"]).is_err());
        assert!(Cli::try_parse_from(["rnc", "import", "rnc.csv"]).is_err());

        let cli = Cli::try_parse_from(["rnc", "new", "--password", "q", "--title", "t"]).unwrap();
        match cli.command {
            Command::New { quality, case } => {
                assert_eq!(quality.password, "q");
                assert_eq!(case.title.as_deref(), Some("t"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_new_case_defaults_reported_at() {
        let now = chrono::NaiveDate::from_ymd_opt(2025, 2, 3)
            .and_then(|d| d.and_hms_opt(4, 5, 6))
            .unwrap();
        let case = NewCaseArgs {
            title: Some("t".to_string()),
            ..Default::default()
        }
        .into_new_case(now);
        assert_eq!(case.reported_at, Some(now));
        assert_eq!(case.title.as_deref(), Some("t"));
    }
}
