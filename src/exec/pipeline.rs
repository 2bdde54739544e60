//! Prestart hook pipeline.
//!
//! The privileged sequence is FIXED:
//! 1. validate arguments and resolve the container plan
//! 2. enter the container's mount namespace
//! 3. bind-mount device nodes, files and directories
//! 4. append device rules to the container's cgroup
//! 5. return to the original mount namespace
//! 6. release the original namespace descriptor
//!
//! Once step 2 succeeded, every failure restores the original namespace
//! before it is reported. No step is retried.

use crate::config::resolver::{ConfigResolver, ContainerPlan};
use crate::config::settings::HookSettings;
use crate::config::types::{HookError, Result, ValidatedRequest};
use crate::config::validator::{validate_args, ArgIndicator};
use crate::kernel::cgroup::{open_backend, AppliedRule, CgroupDeviceManager};
use crate::kernel::mount::{InjectedMount, MountInjector, Mounter};
use crate::kernel::namespace::{NamespaceGuard, NamespaceSwitcher, OriginNamespace};
use crate::observability::audit::{AuditEventType, AuditLog};
use serde::Serialize;
use std::fmt;

/// State names used in logs and audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HookState {
    Init,
    Prepared,
    InContainerNs,
    Mounted,
    CgroupConfigured,
    Restored,
    Done,
    Aborted,
}

impl fmt::Display for HookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookState::Init => "init",
            HookState::Prepared => "prepared",
            HookState::InContainerNs => "in_container_ns",
            HookState::Mounted => "mounted",
            HookState::CgroupConfigured => "cgroup_configured",
            HookState::Restored => "restored",
            HookState::Done => "done",
            HookState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Collaborators shared by every stage of one invocation.
pub struct HookContext<'c> {
    pub settings: &'c HookSettings,
    pub switcher: &'c dyn NamespaceSwitcher,
    pub mounter: &'c dyn Mounter,
    pub audit: &'c AuditLog,
}

/// What a successful invocation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    pub mounts: Vec<InjectedMount>,
    pub rules: Vec<AppliedRule>,
}

// ============================================================================
// Type-State Chain
// ============================================================================
//
// Init -> Prepared -> InContainerNs -> Mounted -> CgroupConfigured ->
// Restored -> Done
//
// Each step consumes the prior state. Only Hook<Restored> can finish, and
// only the in-namespace states hold a NamespaceGuard.

pub trait HookStage {
    const STATE: HookState;
}

/// Type-state marker: nothing validated or opened yet
pub struct Init;

/// Plan resolved; origin descriptor open, namespace untouched
pub struct Prepared<'r> {
    plan: ContainerPlan<'r>,
    origin: OriginNamespace,
}

/// Thread associated with the container's mount namespace
pub struct InContainerNs<'c, 'r> {
    plan: ContainerPlan<'r>,
    guard: NamespaceGuard<'c>,
}

pub struct Mounted<'c, 'r> {
    plan: ContainerPlan<'r>,
    guard: NamespaceGuard<'c>,
    mounts: Vec<InjectedMount>,
}

pub struct CgroupConfigured<'c> {
    guard: NamespaceGuard<'c>,
    mounts: Vec<InjectedMount>,
    rules: Vec<AppliedRule>,
}

/// Back in the original namespace; descriptor not yet released
pub struct Restored {
    origin: OriginNamespace,
    mounts: Vec<InjectedMount>,
    rules: Vec<AppliedRule>,
}

impl HookStage for Init {
    const STATE: HookState = HookState::Init;
}
impl HookStage for Prepared<'_> {
    const STATE: HookState = HookState::Prepared;
}
impl HookStage for InContainerNs<'_, '_> {
    const STATE: HookState = HookState::InContainerNs;
}
impl HookStage for Mounted<'_, '_> {
    const STATE: HookState = HookState::Mounted;
}
impl HookStage for CgroupConfigured<'_> {
    const STATE: HookState = HookState::CgroupConfigured;
}
impl HookStage for Restored {
    const STATE: HookState = HookState::Restored;
}

/// One hook invocation, tracked by type state.
///
/// Stages cannot be skipped or reordered:
///
/// ```compile_fail
/// use npu_prestart::exec::pipeline::{Hook, Prepared};
///
/// fn skip_namespace(hook: Hook<'_, Prepared<'_>>) {
///     let _ = hook.inject_mounts();
/// }
/// ```
///
/// ```compile_fail
/// use npu_prestart::exec::pipeline::{Hook, InContainerNs};
///
/// fn cgroup_before_mounts(hook: Hook<'_, InContainerNs<'_, '_>>) {
///     let _ = hook.configure_cgroup();
/// }
/// ```
///
/// ```compile_fail
/// use npu_prestart::exec::pipeline::{CgroupConfigured, Hook};
///
/// fn finish_inside_container(hook: Hook<'_, CgroupConfigured<'_>>) {
///     let _ = hook.finish();
/// }
/// ```
pub struct Hook<'c, S> {
    ctx: &'c HookContext<'c>,
    stage: S,
}

impl<S: HookStage> Hook<'_, S> {
    pub fn state(&self) -> HookState {
        S::STATE
    }
}

impl<'c> Hook<'c, Init> {
    pub fn new(ctx: &'c HookContext<'c>) -> Self {
        Self { ctx, stage: Init }
    }

    /// Validate the argument vector. Nothing is opened.
    pub fn validate<I, A>(&self, args: I) -> Result<ValidatedRequest>
    where
        I: IntoIterator<Item = (ArgIndicator, A)>,
        A: AsRef<str>,
    {
        validate_args(self.ctx.settings, args)
    }

    /// Resolve namespace and cgroup paths and open the origin descriptor.
    pub fn prepare<'r>(self, request: &'r ValidatedRequest) -> Result<Hook<'c, Prepared<'r>>> {
        log::info!("prepare necessary config");
        let parsed = ConfigResolver::new(self.ctx.settings).resolve(request)?;
        let (plan, origin) = parsed.into_parts();

        Ok(Hook {
            ctx: self.ctx,
            stage: Prepared { plan, origin },
        })
    }
}

impl<'c, 'r> Hook<'c, Prepared<'r>> {
    pub fn plan(&self) -> &ContainerPlan<'r> {
        &self.stage.plan
    }

    /// Enter the container's mount namespace. On failure the descriptor is
    /// released and the thread never moved.
    pub fn enter_container_ns(self) -> Result<Hook<'c, InContainerNs<'c, 'r>>> {
        log::info!("enter container's mount namespace");
        let Prepared { plan, origin } = self.stage;

        let guard = NamespaceGuard::enter(self.ctx.switcher, origin, &plan.container_ns)?;
        self.ctx.audit.note(
            AuditEventType::NamespaceEntered,
            HookState::InContainerNs,
            format!("entered {} of pid {}", plan.container_ns.display(), plan.pid),
        );

        Ok(Hook {
            ctx: self.ctx,
            stage: InContainerNs { plan, guard },
        })
    }
}

impl<'c, 'r> Hook<'c, InContainerNs<'c, 'r>> {
    pub fn inject_mounts(self) -> Result<Hook<'c, Mounted<'c, 'r>>> {
        log::info!("do mounting");
        let InContainerNs { plan, guard } = self.stage;

        let injector = MountInjector::new(self.ctx.settings, self.ctx.mounter);
        let mounts = match injector.inject(&plan) {
            Ok(mounts) => mounts,
            Err(e) => return Err(restore_after_failure(self.ctx, guard, e)),
        };
        for mount in &mounts {
            self.ctx.audit.note(
                AuditEventType::MountInjected,
                HookState::Mounted,
                format!(
                    "{:?} {} -> {}",
                    mount.kind,
                    mount.source.display(),
                    mount.target.display()
                ),
            );
        }

        Ok(Hook {
            ctx: self.ctx,
            stage: Mounted {
                plan,
                guard,
                mounts,
            },
        })
    }
}

impl<'c, 'r> Hook<'c, Mounted<'c, 'r>> {
    pub fn configure_cgroup(self) -> Result<Hook<'c, CgroupConfigured<'c>>> {
        log::info!("set up cgroup");
        let Mounted {
            plan,
            guard,
            mounts,
        } = self.stage;

        let applied = open_backend(&plan.cgroup).and_then(|backend| {
            CgroupDeviceManager::new(self.ctx.settings).configure(&plan, &*backend)
        });
        let rules = match applied {
            Ok(rules) => rules,
            Err(e) => return Err(restore_after_failure(self.ctx, guard, e)),
        };
        for applied in &rules {
            self.ctx.audit.note(
                AuditEventType::CgroupRuleAdded,
                HookState::CgroupConfigured,
                format!(
                    "{} '{}' {:?} in {}",
                    applied.node.name,
                    applied.rule,
                    applied.outcome,
                    plan.cgroup.path.display()
                ),
            );
        }

        Ok(Hook {
            ctx: self.ctx,
            stage: CgroupConfigured {
                guard,
                mounts,
                rules,
            },
        })
    }
}

impl<'c> Hook<'c, CgroupConfigured<'c>> {
    /// Return to the original namespace. The descriptor is released even
    /// when the switch back fails.
    pub fn restore_namespace(self) -> Result<Hook<'c, Restored>> {
        log::info!("back to original namespace");
        let CgroupConfigured {
            guard,
            mounts,
            rules,
        } = self.stage;

        let origin = match guard.restore() {
            Ok(origin) => origin,
            Err(e) => {
                self.ctx.audit.record(
                    self.ctx
                        .audit
                        .event(AuditEventType::RestoreFailed, HookState::Aborted, e.to_string())
                        .with_error(&e),
                );
                return Err(e);
            }
        };
        self.ctx.audit.note(
            AuditEventType::NamespaceRestored,
            HookState::Restored,
            format!("returned to {}", origin.path().display()),
        );

        Ok(Hook {
            ctx: self.ctx,
            stage: Restored {
                origin,
                mounts,
                rules,
            },
        })
    }
}

impl Hook<'_, Restored> {
    /// Release the origin descriptor.
    pub fn finish(self) -> Result<HookReport> {
        let Restored {
            origin,
            mounts,
            rules,
        } = self.stage;
        origin.release()?;

        Ok(HookReport { mounts, rules })
    }
}

/// Restore the origin namespace after a failed in-container step, then hand
/// back the step's error. A failed restore is recorded but does not replace
/// the original error.
fn restore_after_failure(ctx: &HookContext<'_>, guard: NamespaceGuard<'_>, err: HookError) -> HookError {
    log::error!("{}; restoring original namespace before exit", err);
    match guard.restore() {
        Ok(origin) => {
            ctx.audit.note(
                AuditEventType::NamespaceRestored,
                HookState::Aborted,
                format!("returned to {} after failure", origin.path().display()),
            );
            if let Err(release_err) = origin.release() {
                log::error!("{}", release_err);
            }
        }
        Err(restore_err) => {
            log::error!("failed to restore original namespace: {}", restore_err);
            ctx.audit.record(
                ctx.audit
                    .event(
                        AuditEventType::RestoreFailed,
                        HookState::Aborted,
                        restore_err.to_string(),
                    )
                    .with_error(&restore_err),
            );
        }
    }
    err
}

/// Run the whole pipeline for one argument vector.
pub fn execute<I, A>(ctx: &HookContext<'_>, args: I) -> Result<HookReport>
where
    I: IntoIterator<Item = (ArgIndicator, A)>,
    A: AsRef<str>,
{
    ctx.audit.note(
        AuditEventType::InvocationStart,
        HookState::Init,
        format!("prestart hook invoked by pid {}", std::process::id()),
    );

    let hook = Hook::new(ctx);
    let request = match hook.validate(args) {
        Ok(request) => request,
        Err(e) => {
            ctx.audit.record(
                ctx.audit
                    .event(AuditEventType::ArgumentRejected, HookState::Aborted, e.to_string())
                    .with_error(&e),
            );
            return Err(e);
        }
    };

    let result = hook
        .prepare(&request)
        .and_then(|hook| hook.enter_container_ns())
        .and_then(|hook| hook.inject_mounts())
        .and_then(|hook| hook.configure_cgroup())
        .and_then(|hook| hook.restore_namespace())
        .and_then(|hook| hook.finish());

    match &result {
        Ok(report) => ctx.audit.note(
            AuditEventType::InvocationSucceeded,
            HookState::Done,
            format!(
                "pid {}: {} mounts, {} device rules",
                request.pid,
                report.mounts.len(),
                report.rules.len()
            ),
        ),
        Err(e) => ctx.audit.record(
            ctx.audit
                .event(AuditEventType::InvocationFailed, HookState::Aborted, e.to_string())
                .with_error(e),
        ),
    }
    result
}
