use crate::config::settings::HookSettings;
use crate::config::types::{HookError, ValidationError};
use crate::config::validator::ArgIndicator;
use crate::exec::pipeline::{execute, HookContext, HookState};
use crate::kernel::mount::BindMounter;
use crate::kernel::namespace::SetnsSwitcher;
use crate::observability::audit::{AuditEventType, AuditLog};
use crate::observability::logging;
use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;

#[derive(Parser, Debug)]
#[command(
    name = "npu-prestart",
    author,
    version,
    about = "Inject accelerator devices into a created container",
    long_about = None
)]
struct Cli {
    /// Comma-separated device ids
    #[arg(short = 'd', long = "devices", value_name = "IDS", action = ArgAction::Append)]
    devices: Vec<String>,
    /// Pid of the container's init process
    #[arg(short = 'p', long = "pid", value_name = "PID", action = ArgAction::Append)]
    pid: Vec<String>,
    /// Container rootfs path
    #[arg(short = 'r', long = "rootfs", value_name = "PATH", action = ArgAction::Append)]
    rootfs: Vec<String>,
    /// Runtime options: NODRV, VIRTUAL or NODRV,VIRTUAL
    #[arg(short = 'o', long = "options", value_name = "OPTIONS", action = ArgAction::Append)]
    options: Vec<String>,
    /// Host file to mount into the container (repeatable)
    #[arg(short = 'f', long = "mount-file", value_name = "PATH", action = ArgAction::Append)]
    mount_file: Vec<String>,
    /// Host directory to mount into the container (repeatable)
    #[arg(short = 'i', long = "mount-dir", value_name = "PATH", action = ArgAction::Append)]
    mount_dir: Vec<String>,
}

/// clap argument id of each indicator.
fn arg_id(indicator: ArgIndicator) -> &'static str {
    match indicator {
        ArgIndicator::Devices => "devices",
        ArgIndicator::Pid => "pid",
        ArgIndicator::Rootfs => "rootfs",
        ArgIndicator::Options => "options",
        ArgIndicator::MountFile => "mount_file",
        ArgIndicator::MountDir => "mount_dir",
    }
}

/// Parse argv into `(indicator, value)` pairs in command-line order, so
/// validation sees arguments exactly as they were given.
pub fn ordered_arguments<I, T>(argv: I) -> std::result::Result<Vec<(ArgIndicator, String)>, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = Cli::command().try_get_matches_from(argv)?;
    let cli = Cli::from_arg_matches(&matches)?;

    let occurrences = [
        (ArgIndicator::Devices, &cli.devices),
        (ArgIndicator::Pid, &cli.pid),
        (ArgIndicator::Rootfs, &cli.rootfs),
        (ArgIndicator::Options, &cli.options),
        (ArgIndicator::MountFile, &cli.mount_file),
        (ArgIndicator::MountDir, &cli.mount_dir),
    ];

    let mut ordered = Vec::new();
    for (indicator, values) in occurrences {
        if let Some(indices) = matches.indices_of(arg_id(indicator)) {
            ordered.extend(
                indices
                    .zip(values.iter())
                    .map(|(index, value)| (index, indicator, value.clone())),
            );
        }
    }
    ordered.sort_by_key(|(index, _, _)| *index);

    Ok(ordered
        .into_iter()
        .map(|(_, indicator, value)| (indicator, value))
        .collect())
}

/// First line of a clap error without its `error: ` prefix.
fn command_line_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}

pub fn run() -> Result<()> {
    logging::init();
    let audit = AuditLog::from_env();

    if !nix::unistd::geteuid().is_root() {
        log::warn!("Not running as root; namespace and mount operations will be refused");
    }

    let args = match ordered_arguments(std::env::args_os()) {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let err = HookError::from(ValidationError::CommandLine(command_line_message(&e)));
            log::error!("{}", err);
            audit.record(
                audit
                    .event(AuditEventType::ArgumentRejected, HookState::Aborted, err.to_string())
                    .with_error(&err),
            );
            return Err(err.into());
        }
    };

    let settings = HookSettings::default();
    let switcher = SetnsSwitcher;
    let mounter = BindMounter;
    let ctx = HookContext {
        settings: &settings,
        switcher: &switcher,
        mounter: &mounter,
        audit: &audit,
    };

    match execute(&ctx, args) {
        Ok(report) => {
            log::info!(
                "prestart hook finished: {} mounts, {} device rules",
                report.mounts.len(),
                report.rules.len()
            );
            Ok(())
        }
        Err(e) => {
            log::error!("prestart hook failed ({}): {}", e.category(), e);
            Err(e.into())
        }
    }
}
