use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the control-plane gateway workspace",
    long_about = "Runs CI checks and packages the gateway custom handler\n\
                  together with its host configuration for deployment."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build the custom handler and zip it with the host configuration
    Package {
        /// Compilation target triple for the handler binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory holding host.json and the function bindings
        #[arg(long, default_value = "deploy/function_app")]
        app_dir: PathBuf,
        /// Output archive path
        #[arg(long, env = "GATEWAY_PACKAGE_OUTPUT", default_value = "deploy/dist/gateway.zip")]
        output: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Lint,
    /// Unit and integration tests
    Test,
    /// Lint and test
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

const HANDLER_BIN: &str = "function_handler";
const HOST_CONFIG: &str = "host.json";
const FUNCTION_DIR: &str = "generic_api";
const FUNCTION_BINDINGS: &str = "function.json";

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_function_app(target: &str, profile: BuildProfile, app_dir: &Path, output: &Path) {
    ensure_rust_target_installed(target);

    let host_config = app_dir.join(HOST_CONFIG);
    let bindings = app_dir.join(FUNCTION_DIR).join(FUNCTION_BINDINGS);
    for required in [&host_config, &bindings] {
        if !required.exists() {
            panic!("expected function app file at '{}'", required.display());
        }
    }

    step("Build custom handler binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        "gateway_function",
        "--target",
        target,
        "--bin",
        HANDLER_BIN,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package function app archive");
    let binary = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(binary_name(HANDLER_BIN, target));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).expect("failed to create package output directory");
    }

    let entries = [
        ArchiveEntry {
            source: host_config,
            name: HOST_CONFIG.to_string(),
            executable: false,
        },
        ArchiveEntry {
            source: bindings,
            name: format!("{FUNCTION_DIR}/{FUNCTION_BINDINGS}"),
            executable: false,
        },
        ArchiveEntry {
            name: binary_name(HANDLER_BIN, target),
            source: binary,
            executable: true,
        },
    ];
    write_archive(&entries, output);

    eprintln!("\nPackaged artifact:\n- {}", output.display());
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- package`"
        );
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

struct ArchiveEntry {
    source: PathBuf,
    name: String,
    executable: bool,
}

fn write_archive(entries: &[ArchiveEntry], zip_path: &Path) {
    let file = fs::File::create(zip_path).expect("failed to create package zip");
    let mut zip = ZipWriter::new(file);

    for entry in entries {
        if !entry.source.exists() {
            panic!("expected package input at '{}'", entry.source.display());
        }
        let contents = fs::read(&entry.source)
            .unwrap_or_else(|error| panic!("failed to read '{}': {error}", entry.source.display()));
        let mode = if entry.executable { 0o755 } else { 0o644 };
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(mode);
        zip.start_file(entry.name.as_str(), options)
            .unwrap_or_else(|error| panic!("failed to start zip entry '{}': {error}", entry.name));
        zip.write_all(&contents)
            .unwrap_or_else(|error| panic!("failed to write zip entry '{}': {error}", entry.name));
    }

    zip.finish().expect("failed to finish package zip");
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_lint() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);
}

fn ci_test() {
    step("Test gateway_core");
    run_cargo(&["test", "-p", "gateway_core"]);

    step("Test gateway_function");
    run_cargo(&["test", "-p", "gateway_function"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Lint => ci_lint(),
                CiJob::Test => ci_test(),
                CiJob::Check => {
                    ci_lint();
                    ci_test();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::Package {
            target,
            profile,
            app_dir,
            output,
        } => {
            package_function_app(&target, profile, &app_dir, &output);
        }
    }
}
