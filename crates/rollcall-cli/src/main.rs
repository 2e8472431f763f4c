use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, request: &str) -> zbus::Result<String>;
    async fn add_photo(&self, code: &str, image: &str) -> zbus::Result<String>;
    async fn check_in(&self, image: &str) -> zbus::Result<String>;
    async fn check_out(&self, image: &str) -> zbus::Result<String>;
    async fn recognize(&self, image: &str) -> zbus::Result<String>;
    async fn reload_index(&self) -> zbus::Result<u32>;
    async fn set_threshold(&self, value: f64) -> zbus::Result<()>;
    async fn list_employees(&self) -> zbus::Result<String>;
    async fn deactivate_employee(&self, code: &str) -> zbus::Result<()>;
    async fn employee_detail(&self, code: &str) -> zbus::Result<String>;
    async fn remove_photo(&self, encoding_id: i64) -> zbus::Result<String>;
    async fn attendance(&self, filter: &str) -> zbus::Result<String>;
    async fn daily_summary(&self, date: &str) -> zbus::Result<String>;
    async fn weekly_trend(&self, date: &str) -> zbus::Result<String>;
    async fn recent_logs(&self, limit: u32) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new employee from face photos
    Enroll(EnrollArgs),
    /// Add one face photo to an enrolled employee
    AddPhoto {
        /// Employee code
        code: String,
        image: PathBuf,
    },
    /// Check in the employee shown in the image
    CheckIn { image: PathBuf },
    /// Check out the employee shown in the image
    CheckOut { image: PathBuf },
    /// Identify every face in an image without recording attendance
    Recognize { image: PathBuf },
    /// Rebuild the daemon's embedding index from the database
    ReloadIndex,
    /// Change the recognition threshold (0.0 to 1.0)
    SetThreshold { value: f64 },
    /// List active employees
    Employees,
    /// Show an employee's profile, photos and recent attendance
    Employee {
        /// Employee code
        code: String,
    },
    /// Delete one stored face photo; the last photo is kept
    RemovePhoto {
        /// Photo id, as listed by `rollcall employee`
        encoding_id: i64,
    },
    /// Deactivate an employee; history is kept
    Deactivate {
        /// Employee code
        code: String,
    },
    /// Query attendance records
    Attendance(FilterArgs),
    /// Head counts for one day
    Summary {
        /// Day to summarize (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Attendance counts for the seven days ending on a date
    Trend {
        /// Last day of the series (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show recent recognition attempts
    Logs {
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },
    /// Show daemon status
    Status,
}

#[derive(Args)]
struct EnrollArgs {
    /// Unique employee code
    #[arg(short, long)]
    code: String,
    /// Full name
    #[arg(short, long)]
    name: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    position: Option<String>,
    /// Face photos, one face each
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Args, Default)]
struct FilterArgs {
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    employee_id: Option<i64>,
    /// "present" or "late"
    #[arg(long, value_parser = ["present", "late"])]
    status: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    offset: Option<u32>,
}

/// The daemon resolves paths in its own working directory, so send absolute ones.
fn absolute(path: &Path) -> Result<String> {
    let path = std::fs::canonicalize(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(path.to_string_lossy().into_owned())
}

fn enroll_request(args: &EnrollArgs) -> Result<Value> {
    let images = args
        .images
        .iter()
        .map(|p| absolute(p))
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({
        "employee_code": args.code,
        "full_name": args.name,
        "email": args.email,
        "phone": args.phone,
        "department": args.department,
        "position": args.position,
        "images": images,
    }))
}

fn filter_json(args: &FilterArgs) -> Value {
    let mut filter = Map::new();
    if let Some(date) = args.date {
        filter.insert("date".into(), json!(date.format("%Y-%m-%d").to_string()));
    }
    if let Some(id) = args.employee_id {
        filter.insert("employee_id".into(), json!(id));
    }
    if let Some(status) = &args.status {
        filter.insert("status".into(), json!(status));
    }
    if let Some(limit) = args.limit {
        filter.insert("limit".into(), json!(limit));
    }
    if let Some(offset) = args.offset {
        filter.insert("offset".into(), json!(offset));
    }
    Value::Object(filter)
}

/// The daemon reads an empty date as today.
fn date_arg(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

/// Re-indent a JSON reply for the terminal; non-JSON text passes through.
fn pretty(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| raw.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("failed to reach rollcalld")?;

    match cli.command {
        Commands::Enroll(args) => {
            let request = enroll_request(&args)?;
            tracing::debug!(%request, "sending enrollment");
            println!("{}", pretty(&proxy.enroll(&request.to_string()).await?));
        }
        Commands::AddPhoto { code, image } => {
            println!("{}", pretty(&proxy.add_photo(&code, &absolute(&image)?).await?));
        }
        Commands::CheckIn { image } => {
            println!("{}", pretty(&proxy.check_in(&absolute(&image)?).await?));
        }
        Commands::CheckOut { image } => {
            println!("{}", pretty(&proxy.check_out(&absolute(&image)?).await?));
        }
        Commands::Recognize { image } => {
            println!("{}", pretty(&proxy.recognize(&absolute(&image)?).await?));
        }
        Commands::ReloadIndex => {
            let count = proxy.reload_index().await?;
            println!("Index reloaded: {count} embeddings");
        }
        Commands::SetThreshold { value } => {
            proxy.set_threshold(value).await?;
            println!("Recognition threshold set to {value}");
        }
        Commands::Employees => {
            println!("{}", pretty(&proxy.list_employees().await?));
        }
        Commands::Deactivate { code } => {
            proxy.deactivate_employee(&code).await?;
            println!("Deactivated {code}");
        }
        Commands::Employee { code } => {
            println!("{}", pretty(&proxy.employee_detail(&code).await?));
        }
        Commands::RemovePhoto { encoding_id } => {
            println!("{}", pretty(&proxy.remove_photo(encoding_id).await?));
        }
        Commands::Attendance(args) => {
            println!("{}", pretty(&proxy.attendance(&filter_json(&args).to_string()).await?));
        }
        Commands::Summary { date } => {
            println!("{}", pretty(&proxy.daily_summary(&date_arg(date)).await?));
        }
        Commands::Trend { date } => {
            println!("{}", pretty(&proxy.weekly_trend(&date_arg(date)).await?));
        }
        Commands::Logs { limit } => {
            println!("{}", pretty(&proxy.recent_logs(limit).await?));
        }
        Commands::Status => {
            println!("{}", pretty(&proxy.status().await?));
        }
    }

    Ok(())
}
