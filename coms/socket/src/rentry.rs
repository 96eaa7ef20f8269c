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

//! the manifest section (`[Socket]`), persisted/re-derived enums, and the
//! textual reliability-database entry the socket unit reads and writes
//! across reload (`StateSerializer` in the design doc).
#![allow(non_snake_case)]
use confique::Config;
use libsysmaster::exec::ExecCommand;
use libsysmaster::unit::KillMode;
use std::cell::RefCell;
use std::os::unix::prelude::RawFd;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PortType {
    Socket,
    Fifo,
    Special,
    MessageQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketCommand {
    StartPre,
    StartPost,
    StopPre,
    StopPost,
}

/// 13 states of §3/§4.1; `StateMax` is the pre-`db_map` sentinel and is
/// never observed by the manager (its `to_unit_active_state` mapping
/// exists only so a freshly-constructed unit has a total function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub(crate) enum SocketState {
    Dead,
    StartPre,
    StartChown,
    StartPost,
    Listening,
    Running,
    StopPre,
    StopPreSigterm,
    StopPreSigkill,
    StopPost,
    FinalSigterm,
    FinalSigkill,
    Failed,
    Cleaning,
    StateMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub(crate) enum SocketResult {
    Success,
    FailureResources,
    FailureTimeout,
    FailureExitCode,
    FailureSignal,
    FailureCoreDump,
    FailureStartLimitHit,
    FailureServicePermanent,
}

/// the manifest's `[Socket]` section. Field names mirror the keys listed in
/// spec.md §6 verbatim so the toml parses without renaming.
#[derive(Config, Default, Debug)]
pub(crate) struct SectionSocket {
    pub ListenStream: Option<Vec<String>>,
    pub ListenDatagram: Option<Vec<String>>,
    pub ListenSequentialPacket: Option<Vec<String>>,
    pub ListenNetlink: Option<Vec<String>>,
    pub ListenFIFO: Option<Vec<String>>,
    pub ListenSpecial: Option<Vec<String>>,
    pub ListenMessageQueue: Option<Vec<String>>,

    pub Service: Option<String>,

    #[config(default = false)]
    pub BindIPv6Only: bool,
    #[config(default = false)]
    pub Accept: bool,
    #[config(default = 64)]
    pub MaxConnections: u32,
    pub Backlog: Option<u32>,
    pub BindToDevice: Option<String>,
    #[config(default = "0755")]
    pub DirectoryMode: String,
    #[config(default = "0666")]
    pub SocketMode: String,

    #[config(default = false)]
    pub KeepAlive: bool,
    #[config(default = -1)]
    pub Priority: i32,
    pub ReceiveBuffer: Option<u64>,
    pub SendBuffer: Option<u64>,
    pub IPTOS: Option<i32>,
    pub IPTTL: Option<i32>,
    pub Mark: Option<i32>,
    pub PipeSize: Option<i32>,
    #[config(default = false)]
    pub FreeBind: bool,
    #[config(default = false)]
    pub Transparent: bool,
    #[config(default = false)]
    pub Broadcast: bool,
    #[config(default = false)]
    pub PassCredentials: bool,
    #[config(default = false)]
    pub PassSecurity: bool,
    pub TCPCongestion: Option<String>,
    #[config(default = false)]
    pub ReusePort: bool,

    pub SmackLabel: Option<String>,
    pub SmackLabelIPIn: Option<String>,
    pub SmackLabelIPOut: Option<String>,

    #[config(default = 0)]
    pub MessageQueueMaxMessages: i64,
    #[config(default = 0)]
    pub MessageQueueMessageSize: i64,

    pub SocketUser: Option<String>,
    pub SocketGroup: Option<String>,

    #[config(default = 90000000)]
    pub TimeoutSec: u64,

    #[config(default = "control-group")]
    pub KillModeStr: String,
    #[config(default = true)]
    pub SendSIGKILL: bool,

    pub ExecStartPre: Option<Vec<ExecCommand>>,
    pub ExecStartPost: Option<Vec<ExecCommand>>,
    pub ExecStopPre: Option<Vec<ExecCommand>>,
    pub ExecStopPost: Option<Vec<ExecCommand>>,
}

impl SectionSocket {
    pub(crate) fn kill_mode(&self) -> KillMode {
        match self.KillModeStr.as_str() {
            "control-group" => KillMode::ControlGroup,
            "process" => KillMode::Process,
            "mixed" => KillMode::Mixed,
            "none" => KillMode::None,
            _ => KillMode::ControlGroup,
        }
    }
}

/// a pending `re-execution` frame marker: which phase of fd-readiness
/// dispatch we were in when a crash/serialize could have interrupted us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketReFrame {
    FdListen(bool),
}

/// one row of the serialized snapshot: port kind, address/path text, and
/// the duplicated fd index into the external bag (see
/// `StateSerializer`/`distributeFds`).
#[derive(Debug, Clone)]
pub(crate) struct SocketRePort {
    pub p_type: PortType,
    pub listen: String,
    pub fd: RawFd,
}

/// the reliability-database view of one socket unit: everything
/// `serialize`/`deserializeItem` round-trip, plus the last-frame marker
/// used for post-crash diagnosis. `db_map`/`db_insert` on `SocketMng`/
/// `SocketConfig` read and write through this.
#[derive(Default)]
pub(crate) struct SocketRe {
    state: RefCell<Option<SocketState>>,
    result: RefCell<Option<SocketResult>>,
    control_pid: RefCell<Option<i32>>,
    control_cmd_type: RefCell<Option<SocketCommand>>,
    control_cmd_len: RefCell<usize>,
    refused: RefCell<i32>,
    n_accepted: RefCell<u32>,
    ports: RefCell<Vec<SocketRePort>>,
    last_frame: RefCell<Option<SocketReFrame>>,
}

impl SocketRe {
    pub(crate) fn new() -> Rc<SocketRe> {
        Rc::new(SocketRe::default())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn mng_insert(
        &self,
        state: SocketState,
        result: SocketResult,
        control_pid: Option<i32>,
        control_cmd_type: Option<SocketCommand>,
        control_cmd_len: usize,
        refused: i32,
        n_accepted: u32,
        ports: Vec<SocketRePort>,
    ) {
        *self.state.borrow_mut() = Some(state);
        *self.result.borrow_mut() = Some(result);
        *self.control_pid.borrow_mut() = control_pid;
        *self.control_cmd_type.borrow_mut() = control_cmd_type;
        *self.control_cmd_len.borrow_mut() = control_cmd_len;
        *self.refused.borrow_mut() = refused;
        *self.n_accepted.borrow_mut() = n_accepted;
        *self.ports.borrow_mut() = ports;
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn mng_get(
        &self,
    ) -> Option<(
        SocketState,
        SocketResult,
        Option<i32>,
        Option<SocketCommand>,
        usize,
        i32,
        u32,
        Vec<SocketRePort>,
    )> {
        let state = (*self.state.borrow())?;
        let result = (*self.result.borrow())?;
        Some((
            state,
            result,
            *self.control_pid.borrow(),
            *self.control_cmd_type.borrow(),
            *self.control_cmd_len.borrow(),
            *self.refused.borrow(),
            *self.n_accepted.borrow(),
            self.ports.borrow().clone(),
        ))
    }

    pub(crate) fn set_last_frame(&self, frame: SocketReFrame) {
        *self.last_frame.borrow_mut() = Some(frame);
    }

    pub(crate) fn clear_last_frame(&self) {
        *self.last_frame.borrow_mut() = None;
    }
}
