use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::{
    AttendanceDay, DailyReport, EmployeeProfile, EmployeeSummary, FaceTemplate,
};
use serde_json::{json, Value};

mod client;

use client::{field, Client};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Base URL of rollcalld
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    /// API token from `rollcall login`
    #[arg(long, env = "ROLLCALL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain an API token
    Login {
        #[arg(short, long, default_value = "admin")]
        user: String,
        #[arg(short, long, env = "ROLLCALL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show daemon status
    Status,
    /// List employees
    List,
    /// Register an employee, optionally with a face template
    Enroll {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        department: String,
        #[arg(short, long, default_value = "")]
        position: String,
        #[arg(short, long)]
        email: Option<String>,
        /// JSON file holding the face descriptor (array of numbers)
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// Replace an employee's face template
    Reenroll {
        /// Employee ID
        id: String,
        #[arg(short, long)]
        template: PathBuf,
    },
    /// Clear an employee's face template, keeping the profile
    Forget {
        /// Employee ID
        id: String,
    },
    /// Delete an employee and their attendance history
    Remove {
        /// Employee ID
        id: String,
    },
    /// Submit a face descriptor for check-in or check-out
    Scan {
        /// JSON file holding the probe descriptor
        descriptor: PathBuf,
        /// Local capture time, e.g. 2026-06-01T08:45:00 (default: now)
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },
    /// Daily attendance report including absences
    Report {
        /// Date (default: today on the daemon)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Per-employee totals over a date range
    Summary {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Attendance history of one employee
    History {
        /// Employee ID
        id: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.url, cli.token)?;

    match cli.command {
        Commands::Login { user, password } => {
            let body = client
                .post("/api/login", &json!({ "username": user, "password": password }))
                .await?;
            let token: String = field(&body, "token")?;
            let expires: String = field(&body, "expires_at")?;
            println!("export ROLLCALL_TOKEN={token}");
            eprintln!("token expires at {expires}");
        }
        Commands::Status => {
            let body = client.get("/api/status").await?;
            println!("rollcalld {}", body["version"].as_str().unwrap_or("?"));
            println!("  employees:   {}", body["employees"]);
            println!("  enrolled:    {}", body["enrolled"]);
            println!("  threshold:   {}", body["match_threshold"]);
            println!("  late after:  {}", body["late_cutoff"].as_str().unwrap_or("?"));
            println!("  local time:  {}", body["local_time"].as_str().unwrap_or("?"));
        }
        Commands::List => {
            let body = client.get("/api/employees").await?;
            let employees: Vec<EmployeeProfile> = field(&body, "employees")?;
            if employees.is_empty() {
                println!("No employees registered");
            }
            for e in &employees {
                println!("{}", employee_line(e));
            }
        }
        Commands::Enroll {
            name,
            department,
            position,
            email,
            template,
        } => {
            let mut request = json!({
                "name": name,
                "department": department,
                "position": position,
                "email": email,
            });
            if let Some(path) = template {
                request["template"] = json!(read_descriptor(&path)?);
            }
            let body = client.post("/api/employees", &request).await?;
            let employee: EmployeeProfile = field(&body, "employee")?;
            println!("Enrolled {}", employee_line(&employee));
        }
        Commands::Reenroll { id, template } => {
            let request = json!({ "template": read_descriptor(&template)? });
            let body = client
                .put(&format!("/api/employees/{id}/template"), &request)
                .await?;
            let employee: EmployeeProfile = field(&body, "employee")?;
            println!("Template replaced for {}", employee.name);
        }
        Commands::Forget { id } => {
            let body = client
                .delete(&format!("/api/employees/{id}/template"))
                .await?;
            let employee: EmployeeProfile = field(&body, "employee")?;
            println!("Template cleared for {}", employee.name);
        }
        Commands::Remove { id } => {
            client.delete(&format!("/api/employees/{id}")).await?;
            println!("Removed employee {id}");
        }
        Commands::Scan { descriptor, at } => {
            let mut request = json!({ "descriptor": read_descriptor(&descriptor)? });
            if let Some(at) = at {
                request["at"] = json!(at);
            }
            let body = client.post("/api/scan", &request).await?;
            println!("{}", scan_line(&body));
        }
        Commands::Report { date } => {
            let path = match date {
                Some(d) => format!("/api/reports/daily?date={d}"),
                None => "/api/reports/daily".to_string(),
            };
            let body = client.get(&path).await?;
            let report: DailyReport = field(&body, "report")?;
            print_report(&report);
        }
        Commands::Summary { from, to } => {
            let body = client
                .get(&format!("/api/reports/summary{}", range_query(from, to)))
                .await?;
            let summary: Vec<EmployeeSummary> = field(&body, "summary")?;
            println!(
                "{} .. {}",
                body["from"].as_str().unwrap_or("?"),
                body["to"].as_str().unwrap_or("?")
            );
            for s in &summary {
                let confidence = s
                    .mean_confidence
                    .map(|c| format!("{c:.2}"))
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{}  attended {:>3}  late {:>3}  complete {:>3}  confidence {}",
                    s.employee_id, s.days_attended, s.days_late, s.days_completed, confidence
                );
            }
        }
        Commands::History { id, from, to } => {
            let body = client
                .get(&format!(
                    "/api/employees/{id}/attendance{}",
                    range_query(from, to)
                ))
                .await?;
            let days: Vec<AttendanceDay> = field(&body, "attendance")?;
            if days.is_empty() {
                println!("No attendance recorded");
            }
            for day in &days {
                println!("{}", day_line(day));
            }
        }
    }

    Ok(())
}

/// Load a descriptor file: a JSON array of numbers.
fn read_descriptor(path: &Path) -> Result<FaceTemplate> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    FaceTemplate::parse_json(&raw)
        .with_context(|| format!("invalid descriptor in {}", path.display()))
}

fn range_query(from: Option<NaiveDate>, to: Option<NaiveDate>) -> String {
    let params: Vec<String> = [("from", from), ("to", to)]
        .into_iter()
        .filter_map(|(k, v)| v.map(|d| format!("{k}={d}")))
        .collect();
    if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    }
}

fn employee_line(e: &EmployeeProfile) -> String {
    let enrolled = if e.has_template { "enrolled" } else { "no template" };
    format!(
        "{}  {:<24} {:<16} {:<16} [{enrolled}]",
        e.id, e.name, e.department, e.position
    )
}

fn day_line(day: &AttendanceDay) -> String {
    let check_out = day
        .check_out
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".into());
    format!(
        "{}  in {}  out {}  {}",
        day.date,
        day.check_in.format("%H:%M:%S"),
        check_out,
        day.status.as_str()
    )
}

fn scan_line(body: &Value) -> String {
    let name = body["employee"]["name"].as_str().unwrap_or("unknown");
    if body["ok"].as_bool() == Some(true) {
        let event = match body["event"].as_str() {
            Some("check_in") => "checked in",
            Some("check_out") => "checked out",
            _ => "recorded",
        };
        let confidence = body["confidence"].as_f64().unwrap_or(0.0);
        let status = body["status"].as_str().unwrap_or("?");
        format!("{name} {event} ({status}, confidence {confidence:.2})")
    } else {
        match body["reason"].as_str() {
            Some("already_complete") => format!("{name} already checked in and out today"),
            Some("no_face_detected") => "Rejected: no enrolled faces".to_string(),
            Some("not_recognized") => "Rejected: face not recognized".to_string(),
            Some("ambiguous_match") => {
                "Rejected: ambiguous match, check for duplicate enrollments".to_string()
            }
            Some(other) => format!("Rejected: {other}"),
            None => "Rejected".to_string(),
        }
    }
}

fn print_report(report: &DailyReport) {
    println!(
        "{}: {} present, {} late, {} absent, {} checked out",
        report.date, report.present, report.late, report.absent, report.checked_out
    );
    for line in &report.lines {
        let check_in = line
            .check_in
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".into());
        let check_out = line
            .check_out
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".into());
        println!(
            "  {:<24} {:<16} {:<8} {check_in} {check_out}",
            line.name,
            line.department,
            line.status.as_str()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rollcall_core::AttendanceStatus;

    #[test]
    fn test_parse_scan_with_time() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "--url",
            "http://kiosk:9000",
            "scan",
            "probe.json",
            "--at",
            "2026-06-01T08:45:00",
        ])
        .unwrap();
        assert_eq!(cli.url, "http://kiosk:9000");
        match cli.command {
            Commands::Scan { descriptor, at } => {
                assert_eq!(descriptor, PathBuf::from("probe.json"));
                assert_eq!(at.unwrap().to_string(), "2026-06-01 08:45:00");
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_parse_enroll_defaults() {
        let cli = Cli::try_parse_from(["rollcall", "enroll", "--name", "Ana"]).unwrap();
        match cli.command {
            Commands::Enroll {
                name,
                department,
                template,
                ..
            } => {
                assert_eq!(name, "Ana");
                assert_eq!(department, "");
                assert!(template.is_none());
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_invalid_date_rejected() {
        assert!(Cli::try_parse_from(["rollcall", "report", "--date", "June 1"]).is_err());
        assert!(Cli::try_parse_from(["rollcall", "reenroll", "abc"]).is_err());
    }

    #[test]
    fn test_range_query() {
        let d = NaiveDate::from_ymd_opt(2026, 6, 1);
        assert_eq!(range_query(None, None), "");
        assert_eq!(range_query(d, None), "?from=2026-06-01");
        assert_eq!(range_query(d, d), "?from=2026-06-01&to=2026-06-01");
    }

    #[test]
    fn test_read_descriptor() {
        let dir = std::env::temp_dir().join(format!("rollcall-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.json");
        std::fs::write(&good, "[0.5, -0.25, 1]").unwrap();
        assert_eq!(read_descriptor(&good).unwrap().values, vec![0.5, -0.25, 1.0]);

        let placeholder = dir.join("placeholder.json");
        std::fs::write(&placeholder, "\"face_template_data\"").unwrap();
        assert!(read_descriptor(&placeholder).is_err());

        let empty = dir.join("empty.json");
        std::fs::write(&empty, "[]").unwrap();
        assert!(read_descriptor(&empty).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_scan_line() {
        let ok = json!({
            "ok": true,
            "employee": { "name": "Ana" },
            "event": "check_in",
            "confidence": 0.8125,
            "status": "late",
        });
        assert_eq!(scan_line(&ok), "Ana checked in (late, confidence 0.81)");

        let done = json!({ "ok": false, "reason": "already_complete", "employee": { "name": "Ana" } });
        assert_eq!(scan_line(&done), "Ana already checked in and out today");

        let rejected = json!({ "ok": false, "reason": "not_recognized" });
        assert_eq!(scan_line(&rejected), "Rejected: face not recognized");
    }

    #[test]
    fn test_day_line() {
        let day = AttendanceDay {
            employee_id: Default::default(),
            date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            check_in: NaiveTime::from_hms_opt(8, 59, 0).unwrap(),
            check_out: None,
            status: AttendanceStatus::Present,
            confidence: Some(0.9),
        };
        assert_eq!(day_line(&day), "2026-06-01  in 08:59:00  out --:--:--  present");
    }
}
