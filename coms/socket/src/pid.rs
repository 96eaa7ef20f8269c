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

//! tracks the single in-flight hook pid a socket unit may have (invariant 4:
//! at most one `controlPid`). Watching/unwatching goes through the shared
//! `ChildWatch`, so at most one subscription is ever outstanding per unit.
use crate::comm::SocketUnitComm;
use libevent::PidHandler;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::rc::Rc;

pub(super) struct SocketPid {
    comm: Rc<SocketUnitComm>,
    control: RefCell<Option<Pid>>,
}

impl SocketPid {
    pub(super) fn new(commr: &Rc<SocketUnitComm>) -> SocketPid {
        SocketPid {
            comm: Rc::clone(commr),
            control: RefCell::new(None),
        }
    }

    pub(super) fn control(&self) -> Option<Pid> {
        *self.control.borrow()
    }

    /// restore a pid recovered from the reliability database across
    /// coldplug; does not (re)watch it — `entry_coldplug` does that once
    /// the manager handle is attached.
    pub(super) fn update_control(&self, pid: Option<i32>) {
        *self.control.borrow_mut() = pid.map(Pid::from_raw);
    }

    pub(super) fn set_control(&self, pid: Pid, handler: Rc<dyn PidHandler>) {
        *self.control.borrow_mut() = Some(pid);
        self.comm.um().child_watch().subscribe(pid, handler);
    }

    pub(super) fn unwatch_control(&self) {
        if let Some(pid) = self.control.borrow_mut().take() {
            self.comm.um().child_watch().unsubscribe(pid);
        }
    }

    pub(super) fn rewatch_control(&self, handler: Rc<dyn PidHandler>) {
        if let Some(pid) = *self.control.borrow() {
            self.comm.um().child_watch().subscribe(pid, handler);
        }
    }
}
