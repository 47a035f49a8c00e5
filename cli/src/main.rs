//! ftp-deploy - Command-line interface for the deploy engine.
//!
//! Reads `.ftprules` from the working directory (or `--config`), uploads
//! what changed since the last deploy, and reports progress on stderr.

use clap::Parser;
use engine::{
    config::{ensure_template, CONFIG_FILE_NAME},
    init_config,
    transport::transport_for,
    DeployConfig, DeployJob, DeployObserver, DeployOptions, EngineError, Operation,
    OperationOutcome, OperationRecord,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

/// ftp-deploy - Upload only what changed
#[derive(Parser, Debug)]
#[command(name = "ftp-deploy")]
#[command(version)]
#[command(about = "Automated FTP deployment")]
#[command(after_help = "Usage examples:
  ftp-deploy                      # Normal deploy
  ftp-deploy --dry-run            # Shows what would be uploaded
  ftp-deploy --force              # Forces upload of all files
  ftp-deploy --init               # Creates .ftprules using template
  ftp-deploy --open-config-folder # Opens the template folder")]
struct Args {
    /// Config file
    #[arg(long, value_name = "PATH", default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Show what would be sent without connecting
    #[arg(long)]
    dry_run: bool,

    /// Upload every file, even unchanged ones
    #[arg(long)]
    force: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Create .ftprules from the template
    #[arg(long, conflicts_with = "open_config_folder")]
    init: bool,

    /// Open the folder holding .ftprules.example
    #[arg(long)]
    open_config_folder: bool,

    /// Folder holding .ftprules.example (defaults to the executable's folder)
    #[arg(long, value_name = "DIR")]
    template_dir: Option<PathBuf>,
}

/// How a run ended when nothing fatal happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    /// Everything was applied (or nothing needed to be)
    Success,
    /// Some operations failed, were skipped or aborted, or issues were found
    Partial,
}

/// CLI implementation of DeployObserver for console output
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let mins = secs / 60;
        let secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_section(title: &str, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        eprintln!();
        eprintln!("{}: {}", title, lines.len());
        for line in lines {
            eprintln!("  {}", line);
        }
    }
}

impl DeployObserver for CliProgress {
    fn on_plan_ready(&self, job: &DeployJob) {
        if job.plan.is_empty() {
            eprintln!("No files need to be updated.");
            return;
        }

        let mut uploads = Vec::new();
        let mut renames = Vec::new();
        let mut deletes = Vec::new();
        let mut dirs = Vec::new();
        for operation in &job.plan.operations {
            match operation {
                Operation::MakeDir { path } => dirs.push(path.clone()),
                Operation::Upload {
                    local_path,
                    remote_path,
                } => uploads.push(format!("{} -> {}", local_path.display(), remote_path)),
                Operation::Rename { from, to } => renames.push(format!("{} -> {}", from, to)),
                Operation::Delete { remote_path } => {
                    deletes.push(format!("{} (removed locally)", remote_path))
                }
            }
        }

        Self::print_section("Files to be uploaded", &uploads);
        Self::print_section("Files to be renamed", &renames);
        Self::print_section("Files to be removed", &deletes);
        if self.verbose {
            Self::print_section("Directories to be created", &dirs);
        }
        eprintln!();
        eprintln!(
            "Total upload: {}",
            Self::format_bytes(job.total_bytes_to_upload())
        );
    }

    fn on_operation_started(&self, _job: &DeployJob, index: usize, operation: &Operation) {
        if self.verbose {
            eprintln!("[{:3}] Starting: {}", index, operation);
        }
    }

    fn on_operation_completed(&self, _job: &DeployJob, index: usize, record: &OperationRecord) {
        match &record.outcome {
            OperationOutcome::Done => match &record.operation {
                Operation::MakeDir { path } if self.verbose => eprintln!("Created: {}", path),
                Operation::MakeDir { .. } => {}
                Operation::Upload { remote_path, .. } => eprintln!("Uploaded: {}", remote_path),
                Operation::Rename { from, to } => eprintln!("Renamed: {} -> {}", from, to),
                Operation::Delete { remote_path } => eprintln!("Removed: {}", remote_path),
            },
            OperationOutcome::Failed { reason } => {
                eprintln!("Error: {} failed: {}", record.operation, reason)
            }
            OperationOutcome::Skipped { reason } => {
                eprintln!("Skipped: {} ({})", record.operation, reason)
            }
            OperationOutcome::Aborted if self.verbose => {
                eprintln!("[{:3}] Aborted: {}", index, record.operation)
            }
            OperationOutcome::Aborted | OperationOutcome::Pending => {}
        }
    }

    fn on_job_completed(&self, job: &DeployJob) {
        let report = &job.report;

        if !job.forgotten.is_empty() {
            eprintln!(
                "Cache cleanup: {} excluded entries removed",
                job.forgotten.len()
            );
        }

        if !report.issues.is_empty() {
            eprintln!();
            eprintln!("Problems:");
            for issue in &report.issues {
                eprintln!("  [{}] {}: {}", issue.kind, issue.path, issue.message);
            }
        }

        if job.options.dry_run {
            if !job.plan.is_empty() {
                eprintln!();
                eprintln!("[DRY-RUN] Nothing was sent.");
            }
            return;
        }

        if job.plan.is_empty() {
            return;
        }

        eprintln!();
        eprintln!(
            "Summary: {} done, {} failed, {} skipped, {} aborted",
            report.done_count(),
            report.failed_count(),
            report.skipped_count(),
            report.aborted_count()
        );
        eprintln!("Bytes uploaded: {}", Self::format_bytes(report.bytes_uploaded));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if report.is_success() {
            eprintln!();
            eprintln!("Deploy completed to {}!", job.config.destination_label());
        } else if report.aborted {
            eprintln!();
            eprintln!("Deploy aborted; run again to finish.");
        } else {
            eprintln!();
            eprintln!("Deploy finished with errors; run again to retry.");
        }
    }
}

/// Install the tracing subscriber on stderr.
///
/// `RUST_LOG` wins over the flags.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse arguments, run, and map the outcome to an exit code
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(RunStatus::Success) => 0,
        Ok(RunStatus::Partial) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<RunStatus, String> {
    if args.init {
        return init_command(args);
    }

    if args.open_config_folder {
        return open_config_folder_command(args);
    }

    if !args.config.exists() {
        return Err(format!(
            "{} file not found.\nUse 'ftp-deploy --init' to create a configuration file.",
            args.config.display()
        ));
    }

    let config = DeployConfig::load(&args.config).map_err(|e| e.to_string())?;
    let options = DeployOptions {
        dry_run: args.dry_run,
        force: args.force,
    };

    if !options.dry_run {
        eprintln!("Connecting to {}...", config.host);
    }

    let transport = transport_for(&config);
    let progress = CliProgress::new(args.verbose);
    let job = engine::deploy(config, options, transport.as_ref(), Some(&progress))
        .map_err(|e| e.to_string())?;

    if job.report.is_success() {
        Ok(RunStatus::Success)
    } else {
        Ok(RunStatus::Partial)
    }
}

fn init_command(args: &Args) -> Result<RunStatus, String> {
    let template_dir = template_dir(args)?;
    let target_dir = match args.config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    match init_config(&target_dir, &template_dir) {
        Ok(path) => {
            eprintln!("File {} created successfully!", path.display());
            eprintln!("Edit it with your specific FTP settings.");
            Ok(RunStatus::Success)
        }
        Err(EngineError::ConfigExists { path }) => {
            eprintln!("File {} already exists.", path.display());
            Ok(RunStatus::Success)
        }
        Err(e) => Err(e.to_string()),
    }
}

fn open_config_folder_command(args: &Args) -> Result<RunStatus, String> {
    let dir = template_dir(args)?;
    ensure_template(&dir).map_err(|e| e.to_string())?;

    open_folder(&dir).map_err(|e| format!("Could not open {}: {}", dir.display(), e))?;
    eprintln!("Template folder opened: {}", dir.display());
    Ok(RunStatus::Success)
}

/// Folder holding `.ftprules.example`.
fn template_dir(args: &Args) -> Result<PathBuf, String> {
    if let Some(dir) = &args.template_dir {
        return Ok(dir.clone());
    }
    let exe = std::env::current_exe().map_err(|e| format!("Cannot locate executable: {}", e))?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| "Executable has no parent folder".to_string())
}

fn open_folder(dir: &Path) -> std::io::Result<()> {
    let program = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    Command::new(program).arg(dir).spawn().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Project {
        dir: TempDir,
    }

    impl Project {
        /// Project with a `dist` origin and a `file://` mirror as the remote.
        fn new() -> Self {
            let dir = TempDir::new().expect("Failed to create temp dir");
            fs::create_dir_all(dir.path().join("dist")).expect("Failed to create origin");
            fs::create_dir_all(dir.path().join("mirror")).expect("Failed to create mirror");
            let config = format!(
                "[remote]\nfile://{}\n\n[user]\ndeploy\n\n[password]\nsecret\n\n[remote-folder]\nwww\n\n[origin]\ndist\n\n[ignore]\nTEMP/\n",
                dir.path().join("mirror").display()
            );
            fs::write(dir.path().join(CONFIG_FILE_NAME), config).expect("Failed to write config");
            Project { dir }
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.dir.path().join("dist").join(rel);
            fs::create_dir_all(path.parent().expect("Path should have a parent"))
                .expect("Failed to create parent");
            fs::write(path, content).expect("Failed to write file");
        }

        fn remote(&self, rel: &str) -> PathBuf {
            self.dir.path().join("mirror").join("www").join(rel)
        }

        fn args(&self) -> Args {
            Args {
                config: self.dir.path().join(CONFIG_FILE_NAME),
                dry_run: false,
                force: false,
                verbose: false,
                init: false,
                open_config_folder: false,
                template_dir: None,
            }
        }
    }

    #[test]
    fn test_deploy_to_mirror() {
        let project = Project::new();
        project.write("index.html", "<html>");
        project.write("css/site.css", "body{}");
        project.write("TEMP/scratch.txt", "ignored");

        let result = run_cli(&project.args());
        assert_eq!(result, Ok(RunStatus::Success));

        assert!(project.remote("index.html").is_file());
        assert!(project.remote("css/site.css").is_file());
        assert!(!project.remote("TEMP").exists());
        assert!(project.dir.path().join(".ftp_cache.json").is_file());
    }

    #[test]
    fn test_second_deploy_sends_only_changes() {
        let project = Project::new();
        project.write("a.txt", "one");
        project.write("b.txt", "two");
        assert_eq!(run_cli(&project.args()), Ok(RunStatus::Success));

        fs::remove_file(project.dir.path().join("dist").join("b.txt")).expect("Failed to remove");
        fs::rename(
            project.dir.path().join("dist").join("a.txt"),
            project.dir.path().join("dist").join("renamed.txt"),
        )
        .expect("Failed to rename");

        assert_eq!(run_cli(&project.args()), Ok(RunStatus::Success));
        assert!(project.remote("renamed.txt").is_file());
        assert!(!project.remote("a.txt").exists());
        assert!(!project.remote("b.txt").exists());
    }

    #[test]
    fn test_dry_run_sends_nothing() {
        let project = Project::new();
        project.write("a.txt", "one");

        let mut args = project.args();
        args.dry_run = true;

        assert_eq!(run_cli(&args), Ok(RunStatus::Success));
        assert!(!project.remote("a.txt").exists());
        assert!(!project.dir.path().join(".ftp_cache.json").exists());
    }

    #[test]
    fn test_failed_upload_is_partial() {
        let project = Project::new();
        project.write("a.txt", "one");
        project.write("b.txt", "two");
        // A directory where a file should go makes that upload fail.
        fs::create_dir_all(project.remote("b.txt")).expect("Failed to create blocker");

        assert_eq!(run_cli(&project.args()), Ok(RunStatus::Partial));
        assert!(project.remote("a.txt").is_file());
    }

    #[test]
    fn test_missing_config_is_fatal() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let args = Args {
            config: dir.path().join(CONFIG_FILE_NAME),
            dry_run: false,
            force: false,
            verbose: false,
            init: false,
            open_config_folder: false,
            template_dir: None,
        };

        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject a missing config");
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let project = Project::new();
        fs::write(project.dir.path().join(CONFIG_FILE_NAME), "[remote]\nhost\n[bogus]\nx\n")
            .expect("Failed to write config");

        assert!(run_cli(&project.args()).is_err());
    }

    #[test]
    fn test_missing_origin_is_fatal() {
        let project = Project::new();
        fs::remove_dir_all(project.dir.path().join("dist")).expect("Failed to remove origin");

        assert!(run_cli(&project.args()).is_err());
    }

    #[test]
    fn test_init_writes_config_from_template() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let templates = TempDir::new().expect("Failed to create temp dir");
        let args = Args {
            config: dir.path().join(CONFIG_FILE_NAME),
            dry_run: false,
            force: false,
            verbose: false,
            init: true,
            open_config_folder: false,
            template_dir: Some(templates.path().to_path_buf()),
        };

        assert_eq!(run_cli(&args), Ok(RunStatus::Success));
        assert!(dir.path().join(CONFIG_FILE_NAME).is_file());
        assert!(templates.path().join(".ftprules.example").is_file());

        // Running it again leaves the existing file alone.
        fs::write(dir.path().join(CONFIG_FILE_NAME), "mine").expect("Failed to write config");
        assert_eq!(run_cli(&args), Ok(RunStatus::Success));
        assert_eq!(
            fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).expect("Failed to read config"),
            "mine"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(1536), "1.50 KB");
    }
}
