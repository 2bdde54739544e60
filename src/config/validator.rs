// Argument validation
// Fail-closed whitelisting of every externally supplied value. Each
// indicator is dispatched to exactly one validator; the first rejection
// aborts parsing and nothing of a partially parsed request is applied.

use crate::config::settings::HookSettings;
use crate::config::types::{MountList, Result, RuntimeOptions, ValidatedRequest, ValidationError};
use crate::safety::bounded_read::read_pid_max;
use crate::safety::path_legality::check_path_legality;
use std::path::PathBuf;

/// Command-line indicators accepted by the hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgIndicator {
    Devices,
    Pid,
    Rootfs,
    Options,
    MountFile,
    MountDir,
}

impl ArgIndicator {
    pub const ALL: [ArgIndicator; 6] = [
        ArgIndicator::Devices,
        ArgIndicator::Pid,
        ArgIndicator::Rootfs,
        ArgIndicator::Options,
        ArgIndicator::MountFile,
        ArgIndicator::MountDir,
    ];

    pub fn from_short(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|indicator| indicator.short() == c)
    }

    pub fn short(self) -> char {
        match self {
            Self::Devices => 'd',
            Self::Pid => 'p',
            Self::Rootfs => 'r',
            Self::Options => 'o',
            Self::MountFile => 'f',
            Self::MountDir => 'i',
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            Self::Devices => "devices",
            Self::Pid => "pid",
            Self::Rootfs => "rootfs",
            Self::Options => "options",
            Self::MountFile => "mount-file",
            Self::MountDir => "mount-dir",
        }
    }
}

/// Accept a device list made only of decimal digits and commas.
pub fn validate_devices(value: &str) -> std::result::Result<String, ValidationError> {
    if !value.chars().all(|c| c.is_ascii_digit() || c == ',') {
        return Err(ValidationError::IllegalDeviceList(value.to_string()));
    }
    Ok(value.to_string())
}

/// Accept a pid satisfying `0 < pid < pid_max`, reading pid_max live.
pub fn validate_pid(
    value: &str,
    settings: &HookSettings,
) -> std::result::Result<u32, ValidationError> {
    let pid: i64 = value
        .parse()
        .map_err(|_| ValidationError::InvalidPid(value.to_string()))?;

    let max = read_pid_max(
        &settings.pid_max_path(),
        settings.limits.pid_max_read_limit,
        settings.limits.path_max,
    )?;

    if pid <= 0 || pid as u64 >= max {
        return Err(ValidationError::PidOutOfBounds { pid, max });
    }

    u32::try_from(pid).map_err(|_| ValidationError::InvalidPid(value.to_string()))
}

/// Accept a mount source: a legal path that is one of the whitelisted paths.
pub fn validate_mount_path(
    value: &str,
    settings: &HookSettings,
) -> std::result::Result<PathBuf, ValidationError> {
    let path = check_path_legality(value, settings.limits.path_max)?;
    if !settings.is_whitelisted(&path) {
        return Err(ValidationError::NotWhitelisted(value.to_string()));
    }
    Ok(path)
}

/// Accumulates validated arguments in the order they were supplied.
pub struct ArgumentValidator<'s> {
    settings: &'s HookSettings,
    devices: Option<String>,
    pid: Option<u32>,
    rootfs: Option<PathBuf>,
    options: Option<RuntimeOptions>,
    files: MountList,
    dirs: MountList,
}

fn set_once<T>(
    slot: &mut Option<T>,
    indicator: ArgIndicator,
    value: T,
) -> std::result::Result<(), ValidationError> {
    if slot.is_some() {
        return Err(ValidationError::DuplicateArgument(indicator.long_name()));
    }
    *slot = Some(value);
    Ok(())
}

impl<'s> ArgumentValidator<'s> {
    pub fn new(settings: &'s HookSettings) -> Self {
        let capacity = settings.limits.max_mount_nr;
        Self {
            settings,
            devices: None,
            pid: None,
            rootfs: None,
            options: None,
            files: MountList::new(ArgIndicator::MountFile.long_name(), capacity),
            dirs: MountList::new(ArgIndicator::MountDir.long_name(), capacity),
        }
    }

    /// Dispatch one indicator to its validator.
    pub fn accept(
        &mut self,
        indicator: ArgIndicator,
        value: &str,
    ) -> std::result::Result<(), ValidationError> {
        let settings = self.settings;
        let outcome = match indicator {
            ArgIndicator::Devices => {
                validate_devices(value).and_then(|d| set_once(&mut self.devices, indicator, d))
            }
            ArgIndicator::Pid => {
                validate_pid(value, settings).and_then(|p| set_once(&mut self.pid, indicator, p))
            }
            ArgIndicator::Rootfs => check_path_legality(value, settings.limits.path_max)
                .and_then(|r| set_once(&mut self.rootfs, indicator, r)),
            ArgIndicator::Options => RuntimeOptions::parse(value)
                .and_then(|o| set_once(&mut self.options, indicator, o)),
            ArgIndicator::MountFile => {
                // Capacity is checked before any filesystem access.
                self.files.ensure_capacity().and_then(|_| {
                    validate_mount_path(value, settings).and_then(|p| self.files.push(p))
                })
            }
            ArgIndicator::MountDir => self.dirs.ensure_capacity().and_then(|_| {
                validate_mount_path(value, settings).and_then(|p| self.dirs.push(p))
            }),
        };

        if let Err(ref e) = outcome {
            log::error!(
                "failed while parsing cmd arg, indicator: -{} (--{}), value: {:?}: {}",
                indicator.short(),
                indicator.long_name(),
                value,
                e
            );
        }
        outcome
    }

    /// Dispatch a raw short indicator; unknown indicators are rejected.
    pub fn accept_short(
        &mut self,
        indicator: char,
        value: &str,
    ) -> std::result::Result<(), ValidationError> {
        match ArgIndicator::from_short(indicator) {
            Some(known) => self.accept(known, value),
            None => {
                log::error!(
                    "unrecognized cmd arg: indicator: {:?}, value: {:?}",
                    indicator,
                    value
                );
                Err(ValidationError::UnrecognizedArgument(indicator.to_string()))
            }
        }
    }

    /// Check that all required arguments were supplied.
    pub fn finish(self) -> std::result::Result<ValidatedRequest, ValidationError> {
        let devices = self
            .devices
            .filter(|d| !d.is_empty())
            .ok_or(ValidationError::MissingArgument(ArgIndicator::Devices.long_name()))?;
        let pid = self
            .pid
            .ok_or(ValidationError::MissingArgument(ArgIndicator::Pid.long_name()))?;
        let rootfs = self
            .rootfs
            .ok_or(ValidationError::MissingArgument(ArgIndicator::Rootfs.long_name()))?;

        Ok(ValidatedRequest {
            devices,
            rootfs,
            pid,
            options: self.options.unwrap_or_default(),
            files: self.files,
            dirs: self.dirs,
        })
    }
}

/// Validate an ordered argument sequence into a request, failing fast.
pub fn validate_args<I, S>(settings: &HookSettings, args: I) -> Result<ValidatedRequest>
where
    I: IntoIterator<Item = (ArgIndicator, S)>,
    S: AsRef<str>,
{
    let mut validator = ArgumentValidator::new(settings);
    for (indicator, value) in args {
        validator.accept(indicator, value.as_ref())?;
    }

    let request = validator.finish().map_err(|e| {
        log::error!("information not completed or valid: {}", e);
        e
    })?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::HookError;
    use std::fs;
    use std::path::Path;

    struct FakeProc {
        _dir: tempfile::TempDir,
        settings: HookSettings,
    }

    fn fake_proc(pid_max: &str) -> FakeProc {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("sys/kernel")).unwrap();
        fs::write(root.join("sys/kernel/pid_max"), pid_max).unwrap();
        FakeProc {
            settings: HookSettings::default().with_proc_root(&root),
            _dir: dir,
        }
    }

    #[test]
    fn indicator_table_round_trips() {
        for indicator in ArgIndicator::ALL {
            assert_eq!(ArgIndicator::from_short(indicator.short()), Some(indicator));
        }
        assert_eq!(ArgIndicator::from_short('x'), None);
        assert_eq!(ArgIndicator::MountDir.short(), 'i');
    }

    #[test]
    fn devices_accepts_only_digits_and_commas() {
        for ok in ["0", "0,1", "12,", ",3", "0,,1", ""] {
            assert!(validate_devices(ok).is_ok(), "{:?}", ok);
        }
        for bad in ["0-3", "a", "0, 1", "1;2", "0x1", "-1", "1.0"] {
            assert_eq!(
                validate_devices(bad),
                Err(ValidationError::IllegalDeviceList(bad.to_string()))
            );
        }
    }

    #[test]
    fn pid_boundaries_follow_live_pid_max() {
        let proc = fake_proc("32768\n");
        let settings = &proc.settings;

        assert_eq!(validate_pid("1", settings), Ok(1));
        assert_eq!(validate_pid("32767", settings), Ok(32767));
        assert_eq!(
            validate_pid("32768", settings),
            Err(ValidationError::PidOutOfBounds { pid: 32768, max: 32768 })
        );
        assert_eq!(
            validate_pid("0", settings),
            Err(ValidationError::PidOutOfBounds { pid: 0, max: 32768 })
        );
        assert!(matches!(
            validate_pid("-5", settings),
            Err(ValidationError::PidOutOfBounds { pid: -5, .. })
        ));
        assert_eq!(
            validate_pid("12ab", settings),
            Err(ValidationError::InvalidPid("12ab".to_string()))
        );
    }

    #[test]
    fn pid_rejected_when_pid_max_is_garbage() {
        let proc = fake_proc("not-a-number\n");
        assert!(matches!(
            validate_pid("10", &proc.settings),
            Err(ValidationError::PidMaxUnreadable { .. })
        ));
    }

    #[test]
    fn mount_path_must_be_whitelisted() {
        let settings = HookSettings::default();
        assert!(matches!(
            validate_mount_path("/tmp/evil", &settings),
            Err(ValidationError::NotWhitelisted(_))
        ));
        assert!(matches!(
            validate_mount_path("/usr/local/dcmi;", &settings),
            Err(ValidationError::IllegalCharacter { .. })
        ));
    }

    #[test]
    fn whitelist_match_is_exact_for_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let allowed = base.join("usr/local/dcmi");
        let mut settings = HookSettings::default();
        settings.mount_whitelist = vec![allowed.clone()];

        let exact = allowed.to_str().unwrap().to_string();
        assert_eq!(validate_mount_path(&exact, &settings), Ok(allowed));

        let base = base.to_str().unwrap();
        for spelling in [
            format!("{}/usr/local/dcmi/", base),
            format!("{}/usr//local/dcmi", base),
            format!("{}/usr/local/./dcmi", base),
        ] {
            assert_eq!(
                validate_mount_path(&spelling, &settings),
                Err(ValidationError::NotWhitelisted(spelling.clone()))
            );
        }
    }

    #[test]
    fn whitelisted_path_accepted_against_whitelist_in_settings() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().canonicalize().unwrap().join("lib64");
        fs::create_dir(&lib).unwrap();

        let mut settings = HookSettings::default();
        settings.mount_whitelist = vec![lib.clone()];
        assert_eq!(
            validate_mount_path(lib.to_str().unwrap(), &settings),
            Ok(lib.clone())
        );
    }

    #[test]
    fn mount_file_capacity_rejects_the_entry_after_the_limit() {
        let mut settings = HookSettings::default();
        settings.limits.max_mount_nr = 3;
        let mut validator = ArgumentValidator::new(&settings);

        for _ in 0..3 {
            validator
                .accept(ArgIndicator::MountFile, "/usr/local/dcmi")
                .unwrap();
        }
        assert_eq!(
            validator.accept(ArgIndicator::MountFile, "/usr/local/dcmi"),
            Err(ValidationError::CapacityExceeded {
                list: "mount-file",
                max: 3
            })
        );
        // The directory list has its own budget.
        validator
            .accept(ArgIndicator::MountDir, "/usr/local/Ascend/driver/include")
            .unwrap();
    }

    #[test]
    fn scalar_arguments_cannot_repeat() {
        let settings = HookSettings::default();
        let mut validator = ArgumentValidator::new(&settings);
        validator.accept(ArgIndicator::Devices, "0").unwrap();
        assert_eq!(
            validator.accept(ArgIndicator::Devices, "1"),
            Err(ValidationError::DuplicateArgument("devices"))
        );
        validator.accept(ArgIndicator::Options, "NODRV").unwrap();
        assert_eq!(
            validator.accept(ArgIndicator::Options, "NODRV"),
            Err(ValidationError::DuplicateArgument("options"))
        );
    }

    #[test]
    fn unrecognized_short_indicator_rejected() {
        let settings = HookSettings::default();
        let mut validator = ArgumentValidator::new(&settings);
        assert_eq!(
            validator.accept_short('z', "whatever"),
            Err(ValidationError::UnrecognizedArgument("z".to_string()))
        );
        validator.accept_short('o', "VIRTUAL").unwrap();
    }

    #[test]
    fn validate_args_fails_fast_on_first_rejection() {
        let proc = fake_proc("4194304\n");
        let rootfs = proc.settings.proc_root.to_string_lossy().into_owned();
        let args = vec![
            (ArgIndicator::Devices, "0,1".to_string()),
            (ArgIndicator::MountFile, "/tmp/evil".to_string()),
            // Never reached; would otherwise fail with a different error.
            (ArgIndicator::Options, "VIRTUAL,NODRV".to_string()),
            (ArgIndicator::Pid, "1".to_string()),
            (ArgIndicator::Rootfs, rootfs),
        ];

        match validate_args(&proc.settings, args) {
            Err(HookError::Validation(ValidationError::NotWhitelisted(p))) => {
                assert_eq!(p, "/tmp/evil")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn validate_args_requires_devices_pid_and_rootfs() {
        let proc = fake_proc("4194304\n");
        let rootfs = proc.settings.proc_root.to_string_lossy().into_owned();

        let missing_pid = vec![
            (ArgIndicator::Devices, "0".to_string()),
            (ArgIndicator::Rootfs, rootfs.clone()),
        ];
        assert!(matches!(
            validate_args(&proc.settings, missing_pid),
            Err(HookError::Validation(ValidationError::MissingArgument("pid")))
        ));

        let empty_devices = vec![
            (ArgIndicator::Devices, String::new()),
            (ArgIndicator::Pid, "7".to_string()),
            (ArgIndicator::Rootfs, rootfs),
        ];
        assert!(matches!(
            validate_args(&proc.settings, empty_devices),
            Err(HookError::Validation(ValidationError::MissingArgument("devices")))
        ));
    }

    #[test]
    fn validate_args_builds_complete_request() {
        let proc = fake_proc("4194304\n");
        let rootfs = proc.settings.proc_root.clone();
        let args = vec![
            (ArgIndicator::Devices, "3,1".to_string()),
            (ArgIndicator::Pid, "4242".to_string()),
            (ArgIndicator::Rootfs, rootfs.to_string_lossy().into_owned()),
            (ArgIndicator::Options, "NODRV,VIRTUAL".to_string()),
            (ArgIndicator::MountFile, "/usr/local/bin/npu-smi".to_string()),
            (ArgIndicator::MountDir, "/usr/local/dcmi".to_string()),
        ];

        let request = validate_args(&proc.settings, args).unwrap();
        assert_eq!(request.devices, "3,1");
        assert_eq!(request.pid, 4242);
        assert_eq!(request.rootfs, rootfs);
        assert!(request.options.no_driver() && request.options.is_virtual());
        assert_eq!(
            request.files.iter().collect::<Vec<_>>(),
            vec![Path::new("/usr/local/bin/npu-smi")]
        );
        assert_eq!(
            request.dirs.iter().collect::<Vec<_>>(),
            vec![Path::new("/usr/local/dcmi")]
        );
    }
}
