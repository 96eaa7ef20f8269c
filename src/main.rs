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

//! `socketd`: a minimal host for a single socket unit. Loads one manifest,
//! starts it, and runs the epoll loop that drives its lifecycle. A real
//! manager multiplexes many units, a job queue and a dependency graph over
//! this same `UmIf`/`UnitBase` seam; this binary exercises the socket unit
//! in isolation.
use libevent::{ChildWatch, Events, Source};
use libsysmaster::error::{Error, Result};
use libsysmaster::exec::{ExecCommand, ExecContext, ProcessSpawner};
use libsysmaster::rel::Reliability;
use libsysmaster::unit::{
    KillContext, KillOperation, KillWho, UmIf, UnitActiveState, UnitBase, UnitNotifyFlags,
};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use std::ffi::CString;
use std::path::PathBuf;
use std::rc::Rc;

fn init_logging() {
    use log4rs::append::console::ConsoleAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(log::LevelFilter::Info))
        .expect("invalid logging config");
    log4rs::init_config(config).expect("failed to install logger");
}

/// forks and execs one hook with no credential switching or cgroup
/// placement — a real manager resolves `User=`/`Group=` and joins the
/// unit's cgroup in the child before `execvp`.
struct DemoSpawner;

impl ProcessSpawner for DemoSpawner {
    fn spawn(
        &self,
        cmd: &ExecCommand,
        argv: Vec<String>,
        _exec_ctx: &Rc<ExecContext>,
        unit_id: &str,
    ) -> Result<Pid> {
        let path =
            CString::new(cmd.path().as_os_str().to_string_lossy().as_bytes().to_vec())
                .map_err(|e| Error::Other { msg: e.to_string() })?;
        let argv_c = argv
            .iter()
            .map(|a| CString::new(a.as_bytes()).unwrap_or_default())
            .collect::<Vec<_>>();

        match unsafe { fork() }.map_err(|source| Error::Nix { source })? {
            ForkResult::Parent { child } => {
                log::info!("{}: spawned {:?} as pid {}", unit_id, cmd.path(), child);
                Ok(child)
            }
            ForkResult::Child => {
                let _ = execvp(&path, &argv_c);
                std::process::exit(127);
            }
        }
    }
}

/// stands in for both the unit manager (`UmIf`) and the socket unit's own
/// identity (`UnitBase`) — a real manager keeps these separate per unit;
/// with exactly one unit loaded here they collapse into the same object.
struct DemoHost {
    id: String,
    events: Rc<Events>,
    child_watch: Rc<ChildWatch>,
    spawner: Rc<dyn ProcessSpawner>,
}

impl UnitBase for DemoHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn kill_context(
        &self,
        _kill_context: Rc<KillContext>,
        who: Option<KillWho>,
        pid: Option<Pid>,
        op: KillOperation,
    ) -> Result<()> {
        let pid = match pid {
            Some(pid) => pid,
            None => return Ok(()),
        };
        log::info!("{}: sending {:?} to {} ({:?})", self.id, op.to_signal(), pid, who);
        nix::sys::signal::kill(pid, op.to_signal()).map_err(|source| Error::Nix { source })
    }

    fn notify(&self, original: UnitActiveState, new: UnitActiveState, flags: UnitNotifyFlags) {
        log::info!(
            "{}: {:?} -> {:?} (flags {:?})",
            self.id,
            original,
            new,
            flags
        );
    }

    fn test_start_limit(&self) -> bool {
        true
    }
}

impl UmIf for DemoHost {
    fn events(&self) -> Rc<Events> {
        Rc::clone(&self.events)
    }

    fn child_watch(&self) -> Rc<ChildWatch> {
        Rc::clone(&self.child_watch)
    }

    fn spawner(&self) -> Rc<dyn ProcessSpawner> {
        Rc::clone(&self.spawner)
    }

    fn has_stop_job(&self, _unit_id: &str) -> bool {
        false
    }

    fn start_unit(&self, unit_id: &str) -> Result<()> {
        log::info!("{}: would start triggered unit {}", self.id, unit_id);
        Ok(())
    }

    fn unit_enabled(&self, _unit_id: &str) -> Result<()> {
        Ok(())
    }

    fn load_unit_success(&self, _unit_id: &str) -> bool {
        true
    }

    fn relation_active_or_pending(&self, _unit_id: &str) -> bool {
        false
    }

    fn instantiate_service(&self, template: &str, instance: &str, cfd: i32) -> Result<String> {
        let id = format!("{}@{}", template, instance);
        log::info!("{}: instantiated {} for connection fd {}", self.id, id, cfd);
        Ok(id)
    }
}

fn main() {
    init_logging();

    let manifest = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demos/demo.socket.toml"));

    let events = Events::new().expect("failed to create epoll instance");
    let child_watch = ChildWatch::new().expect("failed to register SIGCHLD watch");
    events
        .add_source(Rc::clone(&child_watch) as Rc<dyn Source>)
        .expect("failed to watch SIGCHLD");

    let host = Rc::new(DemoHost {
        id: "demo.socket".to_string(),
        events: Rc::clone(&events),
        child_watch,
        spawner: Rc::new(DemoSpawner),
    });

    let handle = socket::new_socket_unit(
        Rc::clone(&host) as Rc<dyn UmIf>,
        Rc::new(Reliability::new()),
    );
    let unit = handle.as_sub_unit();
    unit.attach_unit(Rc::clone(&host) as Rc<dyn UnitBase>);

    if let Err(e) = unit.load(vec![manifest.clone()]) {
        log::error!("failed to load {}: {}", manifest.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = unit.start() {
        log::error!("failed to start socket unit: {}", e);
        std::process::exit(1);
    }

    log::info!(
        "{} entering event loop, state {:?}",
        host.id,
        unit.current_active_state()
    );
    log::debug!("reliability snapshot:\n{}", handle.serialize());

    loop {
        if let Err(e) = events.run(-1) {
            log::error!("event loop error: {}", e);
            break;
        }
    }
}
