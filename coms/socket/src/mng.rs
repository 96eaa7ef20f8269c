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

//! socket_mng is the core of the socket unit, implementing the 13-state
//! transition table, port fd management, connection dispatch and the
//! timeout/child-exit event routing that drives it.
use super::{
    comm::SocketUnitComm,
    config::SocketConfig,
    dispatch::{self, AcceptOutcome},
    pid::SocketPid,
    port::SocketPort,
    rentry::{PortType, SocketCommand, SocketRe, SocketReFrame, SocketRePort, SocketResult, SocketState},
    spawn::SocketSpawn,
};
use libevent::EventState;
use libevent::{EventType, Events, PidHandler, Source, Timer};
use libutils::IN_SET;
use nix::libc;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::os::unix::prelude::RawFd;
use std::rc::{Rc, Weak};
use libsysmaster::error::*;
use libsysmaster::exec::{ExecCommand, ExecContext};
use libsysmaster::rel::ReliLastFrame;
use libsysmaster::rel::{ReStation, Reliability};
use libsysmaster::unit::{KillOperation, UnitActiveState, UnitNotifyFlags, UnitType};

impl SocketState {
    pub(super) fn to_unit_active_state(self) -> UnitActiveState {
        match self {
            SocketState::Dead => UnitActiveState::UnitInActive,
            SocketState::StartPre | SocketState::StartChown | SocketState::StartPost => {
                UnitActiveState::UnitActivating
            }
            SocketState::Listening | SocketState::Running => UnitActiveState::UnitActive,
            SocketState::StopPre
            | SocketState::StopPreSigterm
            | SocketState::StopPost
            | SocketState::StopPreSigkill
            | SocketState::StateMax
            | SocketState::FinalSigterm
            | SocketState::FinalSigkill => UnitActiveState::UnitDeActivating,
            SocketState::Failed => UnitActiveState::UnitFailed,
            SocketState::Cleaning => UnitActiveState::UnitMaintenance,
        }
    }

    fn to_kill_operation(self) -> KillOperation {
        match self {
            SocketState::FinalSigterm => KillOperation::KillTerminate,
            _ => KillOperation::KillKill,
        }
    }

    /// whether this state has a running timeout watching it; every
    /// transient state does, `Dead`/`Failed`/`Listening`/`Running` don't.
    fn has_timeout(self) -> bool {
        IN_SET!(
            self,
            SocketState::StartPre,
            SocketState::StartChown,
            SocketState::StartPost,
            SocketState::StopPre,
            SocketState::StopPreSigterm,
            SocketState::StopPreSigkill,
            SocketState::StopPost,
            SocketState::FinalSigterm,
            SocketState::FinalSigkill
        )
    }
}

pub(super) struct SocketMng {
    data: Rc<SocketMngData>,
}

impl ReStation for SocketMng {
    fn db_map(&self) {
        self.build_ports();
        self.data.db_map();
    }

    fn db_insert(&self) {
        self.data.db_insert();
    }

    fn entry_coldplug(&self) {
        self.data.entry_coldplug();
    }

    fn entry_clear(&self) {
        self.data.entry_clear();
    }
}

impl SocketMng {
    pub(super) fn new(
        commr: &Rc<SocketUnitComm>,
        configr: &Rc<SocketConfig>,
        exec_ctx: &Rc<ExecContext>,
    ) -> SocketMng {
        SocketMng {
            data: SocketMngData::new(commr, configr, exec_ctx),
        }
    }

    pub(super) fn start_check(&self) -> Result<bool> {
        self.data.start_check()
    }

    pub(super) fn start_action(&self) {
        self.data.start_action();
        self.db_update();
    }

    pub(super) fn stop_check(&self) -> Result<bool> {
        self.data.stop_check()
    }

    pub(super) fn stop_action(&self) {
        self.data.stop_action();
        self.db_update();
    }

    pub(super) fn get_state(&self) -> String {
        self.data.state().to_string()
    }

    pub(super) fn sigchld_event(&self, pid: Pid, code: i32, signal: Option<Signal>) {
        self.data.sigchld_event(pid, code, signal);
        self.db_update();
    }

    pub(super) fn current_active_state(&self) -> UnitActiveState {
        self.data.current_active_state()
    }

    pub(super) fn collect_fds(&self) -> Vec<i32> {
        self.data.collect_fds()
    }

    pub(super) fn build_ports(&self) {
        self.data.build_ports(&self.data);
        self.db_update();
    }

    /// emits the `StateSerializer` textual snapshot for a controlled
    /// re-execution.
    pub(super) fn serialize(&self) -> String {
        self.data.serialize()
    }

    /// restores from a snapshot produced by [`Self::serialize`], reattaching
    /// any fds passed alongside it in `bag`.
    pub(super) fn restore(&self, text: &str, bag: &[crate::serialize::FdBagEntry]) {
        self.data.restore(text, bag);
    }

    fn db_update(&self) {
        self.data.db_update();
    }
}

struct SocketMngData {
    self_weak: RefCell<Weak<SocketMngData>>,

    comm: Rc<SocketUnitComm>,
    config: Rc<SocketConfig>,

    pid: SocketPid,
    spawn: SocketSpawn,
    ports: RefCell<Vec<Rc<SocketMngPort>>>,
    timer: Rc<Timer>,
    state: Rc<RefCell<SocketState>>,
    result: RefCell<SocketResult>,
    control_cmd_type: RefCell<Option<SocketCommand>>,
    control_command: RefCell<Vec<ExecCommand>>,
    refused: RefCell<i32>,
    n_connections: RefCell<u32>,
    n_accepted: RefCell<u32>,
}

impl SocketMngData {
    fn new(
        commr: &Rc<SocketUnitComm>,
        configr: &Rc<SocketConfig>,
        exec_ctx: &Rc<ExecContext>,
    ) -> Rc<SocketMngData> {
        let data = Rc::new(SocketMngData {
            self_weak: RefCell::new(Weak::new()),
            comm: Rc::clone(commr),
            config: Rc::clone(configr),

            pid: SocketPid::new(commr),
            spawn: SocketSpawn::new(commr, exec_ctx),
            ports: RefCell::new(Vec::new()),
            timer: Rc::new(Timer::new().expect("failed to create timerfd")),
            state: Rc::new(RefCell::new(SocketState::StateMax)),
            result: RefCell::new(SocketResult::Success),
            control_cmd_type: RefCell::new(None),
            control_command: RefCell::new(Vec::new()),
            refused: RefCell::new(0),
            n_connections: RefCell::new(0),
            n_accepted: RefCell::new(0),
        });

        *data.self_weak.borrow_mut() = Rc::downgrade(&data);

        let source = Rc::new(SocketMngTimer::new(&data));
        data.comm.um().events().add_source(source).unwrap();

        data
    }

    fn db_map(&self) {
        if let Some((state, result, c_pid, control_cmd_type, control_cmd_len, refused, n_accepted, rports)) =
            self.comm.rentry_mng_get()
        {
            *self.state.borrow_mut() = state;
            *self.result.borrow_mut() = result;
            self.pid.update_control(c_pid);
            self.control_command_update(control_cmd_type, control_cmd_len);
            *self.refused.borrow_mut() = refused;
            *self.n_accepted.borrow_mut() = n_accepted;
            self.map_ports_fd(rports);
        }
    }

    fn entry_clear(&self) {
        self.unwatch_fds();
        let _ = self.timer.disarm();
    }

    fn entry_coldplug(&self) {
        self.watch_fds();
        if let Some(handler) = self.pid_handler() {
            self.pid.rewatch_control(handler);
        }
    }

    fn pid_handler(&self) -> Option<Rc<dyn PidHandler>> {
        self.self_weak
            .borrow()
            .upgrade()
            .map(|data| Rc::new(SocketMngPid::new(&data)) as Rc<dyn PidHandler>)
    }

    fn start_check(&self) -> Result<bool> {
        if IN_SET!(
            self.state(),
            SocketState::StopPre,
            SocketState::StopPreSigkill,
            SocketState::StopPreSigterm,
            SocketState::StopPost,
            SocketState::FinalSigterm,
            SocketState::FinalSigkill,
            SocketState::Cleaning
        ) {
            return Err(Error::UnitActionEAgain);
        }

        if IN_SET!(
            self.state(),
            SocketState::StartPre,
            SocketState::StartChown,
            SocketState::StartPost
        ) {
            return Ok(true);
        }

        self.config.unit_ref_target().map_or(Ok(()), |name| {
            self.comm.um().unit_enabled(&name)
        })?;

        let ret = self.comm.owner().map(|u| u.test_start_limit());
        if ret.is_none() || !ret.unwrap() {
            self.enter_dead(SocketResult::FailureStartLimitHit);
            return Err(Error::UnitActionECanceled);
        }
        Ok(false)
    }

    fn start_action(&self) {
        self.enter_start_pre();
    }

    fn stop_action(&self) {
        self.enter_stop_pre(SocketResult::Success);
    }

    fn stop_check(&self) -> Result<bool> {
        if IN_SET!(
            self.state(),
            SocketState::StopPre,
            SocketState::StopPreSigterm,
            SocketState::StopPreSigkill,
            SocketState::StopPost,
            SocketState::FinalSigterm,
            SocketState::FinalSigkill
        ) {
            return Ok(true);
        }

        if IN_SET!(
            self.state(),
            SocketState::StartPre,
            SocketState::StartChown,
            SocketState::StartPost
        ) {
            self.enter_signal(SocketState::StopPreSigterm, SocketResult::Success);
            return Err(Error::UnitActionEAgain);
        }

        Ok(false)
    }

    fn current_active_state(&self) -> UnitActiveState {
        self.state().to_unit_active_state()
    }

    fn collect_fds(&self) -> Vec<i32> {
        self.ports().iter().map(|p| p.fd()).filter(|&fd| fd >= 0).collect()
    }

    fn enter_start_pre(&self) {
        log::debug!("enter start pre command");
        self.pid.unwatch_control();

        self.control_command_fill(SocketCommand::StartPre);
        match self.control_command_pop() {
            Some(cmd) => {
                if !self.run_command(&cmd, "start pre") {
                    self.enter_dead(SocketResult::FailureResources);
                    return;
                }
                self.set_state(SocketState::StartPre);
            }
            None => self.enter_start_chown(),
        }
    }

    fn enter_start_chown(&self) {
        log::debug!("enter start chown command");
        match self.open_fds() {
            Ok(_) => self.enter_start_post(),
            Err(_) => self.enter_stop_pre(SocketResult::FailureResources),
        }
    }

    fn enter_start_post(&self) {
        log::debug!("enter start post command");
        self.pid.unwatch_control();
        self.control_command_fill(SocketCommand::StartPost);

        match self.control_command_pop() {
            Some(cmd) => {
                if !self.run_command(&cmd, "start post") {
                    self.enter_stop_pre(SocketResult::FailureResources);
                    return;
                }
                self.set_state(SocketState::StartPost);
            }
            None => self.enter_listening(),
        }
    }

    fn enter_listening(&self) {
        log::debug!("enter start listening state");
        if !self.config.accept() {
            self.flush_ports();
        }

        self.watch_fds();
        self.set_state(SocketState::Listening)
    }

    /// `fd < 0` is the "no instance" path (fork-per-connection disabled,
    /// or a datagram/fifo/special port became ready): hand the whole
    /// socket set to the bound service. `fd >= 0` is one accepted stream
    /// connection under `Accept=yes`: spin up a fresh instance for it.
    fn enter_running(&self, fd: i32, instance: Option<String>) {
        let u = match self.comm.owner() {
            Some(u) => u,
            None => return,
        };

        if self.comm.um().has_stop_job(u.id()) {
            if fd >= 0 {
                *self.refused.borrow_mut() += 1;
                let _ = nix::unistd::close(fd);
                return;
            }
            self.flush_ports();
            return;
        }

        if fd < 0 {
            if !self.comm.um().relation_active_or_pending(u.id()) {
                let service = match self.config.unit_ref_target() {
                    Some(s) => s,
                    None => {
                        self.enter_stop_pre(SocketResult::FailureResources);
                        return;
                    }
                };

                self.rentry().set_last_frame(SocketReFrame::FdListen(false));
                let ret = self.comm.um().start_unit(&service);
                self.rentry().set_last_frame(SocketReFrame::FdListen(true));
                if ret.is_err() {
                    self.enter_stop_pre(SocketResult::FailureResources);
                    return;
                }
            }
            self.set_state(SocketState::Running);
        } else {
            *self.n_connections.borrow_mut() += 1;
            let instance = instance.unwrap_or_else(|| fd.to_string());
            let ret = self.comm.um().instantiate_service(u.id(), &instance, fd);
            if ret.is_err() {
                *self.n_connections.borrow_mut() -= 1;
                let _ = nix::unistd::close(fd);
            } else {
                *self.n_accepted.borrow_mut() += 1;
            }
        }
    }

    fn enter_stop_pre(&self, res: SocketResult) {
        log::debug!("enter stop pre command");
        if self.result() == SocketResult::Success {
            self.set_result(res);
        }

        self.pid.unwatch_control();
        self.control_command_fill(SocketCommand::StopPre);

        match self.control_command_pop() {
            Some(cmd) => {
                if !self.run_command(&cmd, "stop pre") {
                    self.enter_stop_post(SocketResult::FailureResources);
                    return;
                }
                self.set_state(SocketState::StopPre);
            }
            None => self.enter_stop_post(SocketResult::Success),
        }
    }

    fn enter_stop_post(&self, res: SocketResult) {
        log::debug!("enter stop post command");
        if self.result() == SocketResult::Success {
            self.set_result(res);
        }

        self.control_command_fill(SocketCommand::StopPost);

        match self.control_command_pop() {
            Some(cmd) => {
                if !self.run_command(&cmd, "stop post") {
                    self.enter_signal(SocketState::FinalSigterm, SocketResult::FailureResources);
                    return;
                }
                self.set_state(SocketState::StopPost);
            }
            None => self.enter_signal(SocketState::FinalSigterm, SocketResult::Success),
        }
    }

    fn enter_signal(&self, state: SocketState, res: SocketResult) {
        log::debug!("enter signal {:?}, res: {:?}", state, res);
        if self.result() == SocketResult::Success {
            self.set_result(res);
        }

        let op = state.to_kill_operation();
        if let Some(u) = self.comm.owner() {
            if u.kill_context(self.config.kill_context(), None, self.pid.control(), op)
                .is_err()
            {
                if IN_SET!(
                    state,
                    SocketState::StopPreSigterm,
                    SocketState::StopPreSigkill
                ) {
                    return self.enter_stop_post(SocketResult::FailureResources);
                } else {
                    return self.enter_dead(SocketResult::FailureResources);
                }
            }
        }

        self.set_state(state);

        if state == SocketState::StopPreSigterm {
            self.enter_signal(SocketState::StopPreSigkill, SocketResult::Success);
        } else if state == SocketState::StopPreSigkill {
            self.enter_stop_post(SocketResult::Success);
        } else if state == SocketState::FinalSigterm {
            self.enter_signal(SocketState::FinalSigkill, SocketResult::Success);
        } else if state == SocketState::FinalSigkill {
            self.enter_dead(SocketResult::Success);
        }
    }

    fn enter_dead(&self, res: SocketResult) {
        log::debug!("enter dead state, res {:?}", res);
        if self.result() == SocketResult::Success {
            self.set_result(res);
        }

        let state = if self.result() == SocketResult::Success {
            SocketState::Dead
        } else {
            SocketState::Failed
        };

        self.set_state(state);
    }

    /// run one hook command, logging on failure in the caller's phase
    /// name; returns whether the spawn succeeded.
    fn run_command(&self, cmd: &ExecCommand, phase: &str) -> bool {
        match self.spawn.start_socket(cmd) {
            Ok(pid) => {
                if let Some(handler) = self.pid_handler() {
                    self.pid.set_control(pid, handler);
                } else {
                    self.pid.update_control(Some(pid.as_raw()));
                }
                true
            }
            Err(e) => {
                let id = self.comm.owner().map(|u| u.id().to_string());
                log::error!(
                    "failed to run {} command for {}: {}",
                    phase,
                    id.as_deref().unwrap_or("<unknown>"),
                    e
                );
                false
            }
        }
    }

    fn run_next(&self) {
        if let Some(cmd) = self.control_command_pop() {
            if !self.run_command(&cmd, "next") {
                // swallow: matches the original's "log and continue" posture
                // for intermediate hook steps within the same phase.
            }
        }
    }

    fn open_fds(&self) -> Result<()> {
        let unit_id = self.comm.owner().map(|u| u.id().to_string()).unwrap_or_default();
        let backlog = self.config.backlog();

        for mport in self.mports().iter() {
            if let Err(e) = mport.port.open(&unit_id, &self.config, backlog) {
                self.close_fds();
                return Err(e);
            }
        }

        Ok(())
    }

    fn close_fds(&self) {
        let events = self.comm.um().events();
        for mport in self.mports().iter() {
            let source = Rc::clone(mport) as Rc<dyn Source>;
            let _ = events.del_source(source);
        }

        for port in self.ports().iter() {
            port.close(false);
        }
    }

    fn watch_fds(&self) {
        let events = self.comm.um().events();
        for mport in self.mports().iter() {
            if mport.fd() < 0 {
                continue;
            }
            let source = Rc::clone(mport) as Rc<dyn Source>;
            events.add_source(Rc::clone(&source)).unwrap();
            events.set_enabled(source, EventState::On).unwrap();
        }
    }

    fn unwatch_fds(&self) {
        let events = self.comm.um().events();
        for mport in self.mports().iter() {
            let source = Rc::clone(mport) as Rc<dyn Source>;
            let _ = events.set_enabled(source, EventState::Off);
        }
    }

    fn flush_ports(&self) {
        for port in self.ports().iter() {
            port.flush_accept();
            port.flush_fd();
        }
    }

    fn set_state(&self, state: SocketState) {
        let original_state = self.state();
        *self.state.borrow_mut() = state;

        if !IN_SET!(
            state,
            SocketState::StartPre,
            SocketState::StartChown,
            SocketState::StartPost,
            SocketState::StopPre,
            SocketState::StopPreSigterm,
            SocketState::StopPreSigkill,
            SocketState::StopPost,
            SocketState::FinalSigterm,
            SocketState::FinalSigkill
        ) {
            self.pid.unwatch_control();
        }

        if state != SocketState::Listening {
            self.unwatch_fds();
        }

        if !IN_SET!(
            state,
            SocketState::StartChown,
            SocketState::StartPost,
            SocketState::Listening,
            SocketState::Running,
            SocketState::StopPre,
            SocketState::StopPreSigterm,
            SocketState::StopPreSigkill
        ) {
            self.close_fds();
        }

        if state.has_timeout() {
            let _ = self.timer.set(self.config.timeout_usec());
        } else {
            let _ = self.timer.disarm();
        }

        log::debug!(
            "original state: {:?}, change to: {:?}",
            original_state,
            state
        );

        if let Some(u) = self.comm.owner() {
            u.notify(
                original_state.to_unit_active_state(),
                state.to_unit_active_state(),
                UnitNotifyFlags::UNIT_NOTIFY_RELOAD_FAILURE,
            )
        }
    }

    fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    fn control_command_fill(&self, cmd_type: SocketCommand) {
        if let Some(cmds) = self.config.get_exec_cmds(cmd_type) {
            *self.control_command.borrow_mut() = cmds;
            *self.control_cmd_type.borrow_mut() = Some(cmd_type);
        }
    }

    fn control_command_pop(&self) -> Option<ExecCommand> {
        self.control_command.borrow_mut().pop()
    }

    fn control_command_update(&self, cmd_type: Option<SocketCommand>, len: usize) {
        if let Some(c_type) = cmd_type {
            self.control_command.borrow_mut().clear();
            self.control_command_fill(c_type);
            let max = self.control_command.borrow().len();
            for _i in len..max {
                self.control_command_pop();
            }
        } else {
            assert_eq!(len, 0);
        }
    }

    fn result(&self) -> SocketResult {
        *self.result.borrow()
    }

    fn set_result(&self, res: SocketResult) {
        *self.result.borrow_mut() = res;
    }

    fn build_ports(&self, mng: &Rc<SocketMngData>) {
        for p_conf in self.config.ports().iter() {
            let port = Rc::new(SocketPort::new(Rc::clone(p_conf)));
            let mport = Rc::new(SocketMngPort::new(mng, port));
            self.ports.borrow_mut().push(mport);
        }
    }

    fn map_ports_fd(&self, rports: Vec<SocketRePort>) {
        for rport in rports.iter() {
            if let Some(port) = self.ports_find(rport.p_type, &rport.listen) {
                port.set_fd(self.comm.reli().fd_take(rport.fd));
            }
        }
    }

    fn mports(&self) -> Vec<Rc<SocketMngPort>> {
        self.ports.borrow().iter().map(Rc::clone).collect::<_>()
    }

    fn ports_find(&self, p_type: PortType, listen: &str) -> Option<Rc<SocketPort>> {
        self.ports()
            .iter()
            .find(|p| p.p_type() == p_type && p.listen() == listen)
            .cloned()
    }

    fn ports(&self) -> Vec<Rc<SocketPort>> {
        self.ports
            .borrow()
            .iter()
            .map(|p| Rc::clone(&p.port))
            .collect::<_>()
    }

    fn rentry(&self) -> Rc<SocketRe> {
        self.comm.rentry()
    }

    fn db_insert(&self) {
        self.comm.rentry_mng_insert(
            self.state(),
            self.result(),
            self.pid.control().map(|p| p.as_raw()),
            *self.control_cmd_type.borrow(),
            self.control_command.borrow().len(),
            *self.refused.borrow(),
            *self.n_accepted.borrow(),
            self.ports()
                .iter()
                .map(|p| SocketRePort {
                    p_type: p.p_type(),
                    listen: p.listen().to_string(),
                    fd: p.fd(),
                })
                .collect::<_>(),
        );
    }

    fn db_update(&self) {
        self.db_insert();
    }

    /// the textual snapshot `StateSerializer` emits ahead of a controlled
    /// re-execution; symmetric with [`Self::restore`].
    fn serialize(&self) -> String {
        let exec_ctx = self.spawn.exec_ctx();
        crate::serialize::serialize(&crate::serialize::SocketSnapshot {
            state: self.state(),
            result: self.result(),
            control_pid: self.pid.control().map(|p| p.as_raw()),
            control_cmd_type: *self.control_cmd_type.borrow(),
            control_cmd_len: self.control_command.borrow().len(),
            refused: *self.refused.borrow(),
            n_accepted: *self.n_accepted.borrow(),
            ports: self
                .ports()
                .iter()
                .map(|p| SocketRePort {
                    p_type: p.p_type(),
                    listen: p.listen().to_string(),
                    fd: p.fd(),
                })
                .collect(),
            tmp_dir: exec_ctx.tmp_dir().map(|p| p.to_string_lossy().into_owned()),
            var_tmp_dir: exec_ctx
                .var_tmp_dir()
                .map(|p| p.to_string_lossy().into_owned()),
        })
    }

    /// consume a snapshot written by [`Self::serialize`], reattaching fds
    /// from `bag` onto any port whose kind and listen address match.
    fn restore(&self, text: &str, bag: &[crate::serialize::FdBagEntry]) {
        let snap = match crate::serialize::deserialize(text) {
            Some(snap) => snap,
            None => {
                log::warn!("discarding unparsable socket reliability snapshot");
                return;
            }
        };

        *self.state.borrow_mut() = snap.state;
        *self.result.borrow_mut() = snap.result;
        self.pid.update_control(snap.control_pid);
        self.control_command_update(snap.control_cmd_type, snap.control_cmd_len);
        *self.refused.borrow_mut() = snap.refused;
        *self.n_accepted.borrow_mut() = snap.n_accepted;

        let mut ports = snap.ports;
        crate::serialize::distribute_fds(&mut ports, bag);

        let exec_ctx = self.spawn.exec_ctx();
        if let Some(dir) = snap.tmp_dir {
            exec_ctx.set_tmp_dir(std::path::PathBuf::from(dir));
        }
        if let Some(dir) = snap.var_tmp_dir {
            exec_ctx.set_var_tmp_dir(std::path::PathBuf::from(dir));
        }

        self.map_ports_fd(ports);
    }

    fn on_timeout(&self) {
        log::warn!("{:?} timed out", self.state());
        match self.state() {
            SocketState::StartPre => self.enter_signal(SocketState::FinalSigterm, SocketResult::FailureTimeout),
            SocketState::StartChown | SocketState::StartPost => {
                self.enter_stop_pre(SocketResult::FailureTimeout)
            }
            SocketState::StopPre => self.enter_signal(SocketState::StopPreSigterm, SocketResult::FailureTimeout),
            SocketState::StopPreSigterm => {
                if self.config.send_sigkill() {
                    self.enter_signal(SocketState::StopPreSigkill, SocketResult::FailureTimeout)
                } else {
                    self.enter_stop_post(SocketResult::FailureTimeout)
                }
            }
            SocketState::StopPreSigkill => self.enter_stop_post(SocketResult::FailureTimeout),
            SocketState::StopPost => self.enter_signal(SocketState::FinalSigterm, SocketResult::FailureTimeout),
            SocketState::FinalSigterm => {
                if self.config.send_sigkill() {
                    self.enter_signal(SocketState::FinalSigkill, SocketResult::FailureTimeout)
                } else {
                    self.enter_dead(SocketResult::FailureTimeout)
                }
            }
            SocketState::FinalSigkill => self.enter_dead(SocketResult::FailureTimeout),
            _ => {}
        }
        self.db_update();
    }
}

impl SocketMngData {
    fn sigchld_result(code: i32, signal: Option<Signal>) -> SocketResult {
        match signal {
            None => {
                if code == 0 {
                    SocketResult::Success
                } else {
                    SocketResult::FailureExitCode
                }
            }
            Some(_) => SocketResult::FailureSignal,
        }
    }

    fn sigchld_event(&self, _pid: Pid, code: i32, signal: Option<Signal>) {
        let res = Self::sigchld_result(code, signal);

        if !self.control_command.borrow().is_empty() && res == SocketResult::Success {
            self.run_next();
        } else {
            match self.state() {
                SocketState::StartPre => {
                    if res == SocketResult::Success {
                        self.enter_start_chown();
                    } else {
                        self.enter_signal(SocketState::FinalSigterm, res);
                    }
                }
                SocketState::StartChown => {
                    if res == SocketResult::Success {
                        self.enter_start_post();
                    } else {
                        self.enter_stop_pre(res);
                    }
                }
                SocketState::StartPost => {
                    if res == SocketResult::Success {
                        self.enter_listening();
                    } else {
                        self.enter_stop_pre(res);
                    }
                }
                SocketState::StopPre
                | SocketState::StopPreSigterm
                | SocketState::StopPreSigkill => {
                    self.enter_stop_post(res);
                }
                SocketState::StopPost | SocketState::FinalSigterm | SocketState::FinalSigkill => {
                    self.enter_dead(res);
                }
                _ => {
                    log::error!(
                        "control command should not exit, current state is : {:?}",
                        self.state()
                    );
                }
            }
        }
    }
}

/// wraps one readiness accept/dispatch decision; spawned once per
/// configured port and kept alive for the socket unit's lifetime, since
/// re-registering a fresh `Source` on every `Listening` cycle would lose
/// the `token()` identity the epoll wrapper keys dispatch on.
struct SocketMngPort {
    mng: Weak<SocketMngData>,
    port: Rc<SocketPort>,
}

impl Source for SocketMngPort {
    fn fd(&self) -> RawFd {
        self.port.fd()
    }

    fn event_type(&self) -> EventType {
        EventType::Io
    }

    fn epoll_event(&self) -> i32 {
        libc::EPOLLIN as i32
    }

    fn priority(&self) -> i8 {
        0i8
    }

    fn dispatch(&self, _: &Events) -> i32 {
        self.reli().set_last_frame2(
            ReliLastFrame::SubManager as u32,
            UnitType::UnitSocket as u32,
        );
        self.rentry().set_last_frame(SocketReFrame::FdListen(true));
        if let Some(u) = self.mng().comm.owner() {
            self.reli().set_last_unit(u.id());
        }

        let ret = self.dispatch_io();

        self.reli().clear_last_unit();
        self.rentry().clear_last_frame();
        self.reli().clear_last_frame();
        ret.map(|_| 0).unwrap_or(-1)
    }

    fn token(&self) -> u64 {
        let data: u64 = self as *const Self as u64;
        data
    }
}

impl SocketMngPort {
    fn new(mng: &Rc<SocketMngData>, port: Rc<SocketPort>) -> SocketMngPort {
        SocketMngPort {
            mng: Rc::downgrade(mng),
            port,
        }
    }

    fn dispatch_io(&self) -> Result<()> {
        if self.mng().state() != SocketState::Listening {
            return Ok(());
        }

        let accept = self.mng().config.accept() && self.port.can_accept();
        if !accept {
            self.mng().enter_running(-1, None);
            self.mng().db_update();
            return Ok(());
        }

        let max = self.mng().config.max_connections();
        let n = *self.mng().n_connections.borrow();
        let n_accepted = *self.mng().n_accepted.borrow();
        match dispatch::accept_one(&self.port, max, n, n_accepted) {
            AcceptOutcome::Accepted { cfd, instance } => {
                self.mng().enter_running(cfd, Some(instance));
            }
            AcceptOutcome::Refused => {
                *self.mng().refused.borrow_mut() += 1;
            }
            AcceptOutcome::WouldBlock => {}
        }
        self.mng().db_update();

        Ok(())
    }

    fn reli(&self) -> Rc<Reliability> {
        self.mng().comm.reli()
    }

    fn rentry(&self) -> Rc<SocketRe> {
        self.mng().comm.rentry()
    }

    fn mng(&self) -> Rc<SocketMngData> {
        self.mng.clone().upgrade().unwrap()
    }
}

/// the timerfd readiness source; one per socket unit, registered for its
/// whole lifetime and armed/disarmed by `set_state` rather than
/// added/removed from the event loop each cycle.
struct SocketMngTimer {
    mng: Weak<SocketMngData>,
}

impl SocketMngTimer {
    fn new(mng: &Rc<SocketMngData>) -> SocketMngTimer {
        SocketMngTimer {
            mng: Rc::downgrade(mng),
        }
    }

    fn mng(&self) -> Rc<SocketMngData> {
        self.mng.clone().upgrade().unwrap()
    }
}

impl Source for SocketMngTimer {
    fn fd(&self) -> RawFd {
        self.mng().timer.fd()
    }

    fn event_type(&self) -> EventType {
        EventType::Io
    }

    fn epoll_event(&self) -> i32 {
        libc::EPOLLIN as i32
    }

    fn priority(&self) -> i8 {
        -10i8
    }

    fn dispatch(&self, _: &Events) -> i32 {
        self.mng().timer.ack();
        self.mng().on_timeout();
        0
    }

    fn token(&self) -> u64 {
        self as *const Self as u64
    }
}

/// bridges `ChildWatch`'s pid-keyed callback into the state machine's
/// `(pid, code, signal)` sigchld handling.
struct SocketMngPid {
    mng: Weak<SocketMngData>,
}

impl SocketMngPid {
    fn new(mng: &Rc<SocketMngData>) -> SocketMngPid {
        SocketMngPid {
            mng: Rc::downgrade(mng),
        }
    }
}

impl PidHandler for SocketMngPid {
    fn on_exit(&self, pid: Pid, status: WaitStatus) {
        let mng = match self.mng.clone().upgrade() {
            Some(m) => m,
            None => return,
        };
        let (code, signal) = match status {
            WaitStatus::Exited(_, code) => (code, None),
            WaitStatus::Signaled(_, signal, _) => (-1, Some(signal)),
            _ => return,
        };
        mng.sigchld_event(pid, code, signal);
    }
}

#[cfg(test)]
mod tests {
    use super::SocketState;
    use libsysmaster::unit::UnitActiveState;

    #[test]
    fn test_socket_active_state() {
        assert_eq!(
            SocketState::Dead.to_unit_active_state(),
            UnitActiveState::UnitInActive
        );
        assert_eq!(
            SocketState::StartPre.to_unit_active_state(),
            UnitActiveState::UnitActivating
        );
        assert_eq!(
            SocketState::StartChown.to_unit_active_state(),
            UnitActiveState::UnitActivating
        );
        assert_eq!(
            SocketState::StartPost.to_unit_active_state(),
            UnitActiveState::UnitActivating
        );
        assert_eq!(
            SocketState::Listening.to_unit_active_state(),
            UnitActiveState::UnitActive
        );
        assert_eq!(
            SocketState::Running.to_unit_active_state(),
            UnitActiveState::UnitActive
        );
        assert_eq!(
            SocketState::StopPre.to_unit_active_state(),
            UnitActiveState::UnitDeActivating
        );
        assert_eq!(
            SocketState::StopPreSigterm.to_unit_active_state(),
            UnitActiveState::UnitDeActivating
        );
        assert_eq!(
            SocketState::StopPost.to_unit_active_state(),
            UnitActiveState::UnitDeActivating
        );
        assert_eq!(
            SocketState::StopPreSigkill.to_unit_active_state(),
            UnitActiveState::UnitDeActivating
        );
        assert_eq!(
            SocketState::FinalSigterm.to_unit_active_state(),
            UnitActiveState::UnitDeActivating
        );
        assert_eq!(
            SocketState::Failed.to_unit_active_state(),
            UnitActiveState::UnitFailed
        );
        assert_eq!(
            SocketState::Cleaning.to_unit_active_state(),
            UnitActiveState::UnitMaintenance
        );
    }
}
