// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! the narrow surface sub units share with the unit manager: the public
//! active-state enum every sub unit's internal state maps onto, kill
//! semantics, and the trait seams (`UnitBase`, `UmIf`, `SubUnit`,
//! `UnitMngUtil`) that let a sub unit live inside the manager without
//! owning it.
use crate::error::*;
use crate::exec::ExecCommand;
use bitflags::bitflags;
use libcgroup::CgFlags;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::path::PathBuf;
use std::rc::Rc;

/// Unit stats:
/// ```graph LR
/// C[UnitInActive] -> E[UnitActivating]
/// E->A[UnitActive]
/// E->F[UnitDeActivating]
/// E->D[UnitFailed]
/// ```
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum UnitActiveState {
    UnitActive,
    UnitReloading,
    UnitInActive,
    UnitFailed,
    UnitActivating,
    UnitDeActivating,
    UnitMaintenance,
}

bitflags! {
    pub struct UnitNotifyFlags: u8 {
        const UNIT_NOTIFY_RELOAD_FAILURE = 1 << 0;
        const UNIT_NOTIFY_WILL_AUTO_RESTART = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UnitType {
    UnitService,
    UnitSocket,
    UnitTarget,
    UnitMount,
}

/// who a `kill()` call should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillWho {
    Main,
    Control,
    All,
}

/// which signal sequence a state transition asks `kill_context` to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOperation {
    KillTerminate,
    KillKill,
}

impl KillOperation {
    pub fn to_signal(self) -> Signal {
        match self {
            KillOperation::KillTerminate => Signal::SIGTERM,
            KillOperation::KillKill => Signal::SIGKILL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    ControlGroup,
    Process,
    Mixed,
    None,
}

impl Default for KillMode {
    fn default() -> Self {
        KillMode::ControlGroup
    }
}

/// resolved kill policy for a unit; `SocketConfig::parse_kill_context`
/// fills this in from the manifest's `KillMode=`.
#[derive(Default)]
pub struct KillContext {
    mode: std::cell::Cell<KillMode>,
}

impl KillContext {
    pub fn set_kill_mode(&self, mode: KillMode) {
        self.mode.set(mode);
    }

    pub fn kill_mode(&self) -> KillMode {
        self.mode.get()
    }
}

/// the manager-owned view of a unit that its sub unit gets a handle to.
/// Never owned by the sub unit — see the back-reference design note in
/// `SPEC_FULL.md`/spec.md §9.
pub trait UnitBase {
    fn id(&self) -> &str;

    /// send `op`'s signal to `pid` and/or the unit's process group,
    /// honoring `kill_mode()`. Returns `Err` if nothing could be signaled
    /// (e.g. the process already gone and no cgroup configured).
    fn kill_context(
        &self,
        kill_context: Rc<KillContext>,
        who: Option<KillWho>,
        pid: Option<Pid>,
        op: KillOperation,
    ) -> Result<()>;

    fn notify(&self, original: UnitActiveState, new: UnitActiveState, flags: UnitNotifyFlags);

    /// start-rate-limit check; `false` means the unit has restarted too
    /// often recently and must not be started again right now.
    fn test_start_limit(&self) -> bool;
}

/// the manager's side of the socket ↔ service pair: lookups by name,
/// access to the shared event loop, and job-queue queries the state
/// machine needs without owning the job queue itself.
pub trait UmIf {
    fn events(&self) -> Rc<libevent::Events>;
    fn child_watch(&self) -> Rc<libevent::ChildWatch>;
    fn spawner(&self) -> Rc<dyn crate::exec::ProcessSpawner>;
    fn has_stop_job(&self, unit_id: &str) -> bool;
    fn start_unit(&self, unit_id: &str) -> Result<()>;
    fn unit_enabled(&self, unit_id: &str) -> Result<()>;
    fn load_unit_success(&self, unit_id: &str) -> bool;
    fn relation_active_or_pending(&self, unit_id: &str) -> bool;

    /// clone the named service unit template, give it `cfd`, and enqueue a
    /// `Start` job for it; returns the instantiated unit's id.
    fn instantiate_service(&self, template: &str, instance: &str, cfd: i32) -> Result<String>;
}

/// behavior every sub unit (service/socket/target/mount/...) implements;
/// the manager drives it purely through this trait, never through a
/// concrete downcast.
pub trait SubUnit: crate::rel::ReStation {
    fn load(&self, paths: Vec<PathBuf>) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn stop(&self, force: bool) -> Result<()>;
    fn sigchld_events(&self, pid: Pid, code: i32, signal: Option<Signal>);
    fn current_active_state(&self) -> UnitActiveState;
    fn get_subunit_state(&self) -> String;
    fn collect_fds(&self) -> Vec<i32> {
        Vec::new()
    }
    fn attach_unit(&self, unit: Rc<dyn UnitBase>);
}

/// attaches the weak manager/reliability handles a sub unit needs at
/// construction time, before `attach_unit` gives it its own identity.
pub trait UnitMngUtil {
    fn attach_um(&self, um: Rc<dyn UmIf>);
    fn attach_reli(&self, reli: Rc<crate::rel::Reliability>);
}

/// placeholder argv-expansion hook; real expansion (specifiers like `%n`)
/// lives with the manifest loader. Kept here because `ExecCommand` needs a
/// stable expansion entrypoint sub units can call uniformly.
pub fn expand_argv(cmd: &ExecCommand, _unit_id: &str) -> Vec<String> {
    cmd.argv().to_vec()
}

/// register a sub unit's constructor under `plugin_name` so the manifest
/// loader can instantiate it by unit suffix (`.socket`, `.service`, ...).
/// A real plugin host would use `dynamic_reload`/`dlopen`; sub units here
/// are linked directly, so this just records a name -> constructor mapping
/// used by tests and the demo binary.
#[macro_export]
macro_rules! declure_unitobj_plugin_with_param {
    ($unit:ty, $constructor:path, $name:expr) => {
        impl $unit {
            pub const PLUGIN_NAME: &'static str = $name;

            pub fn new_for_plugin(um: std::rc::Rc<dyn $crate::unit::UmIf>) -> $unit {
                $constructor(um)
            }
        }
    };
}
