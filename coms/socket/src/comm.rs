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

//! `SocketUnitComm` is the one place every other submodule reaches through
//! to get at the things the socket unit doesn't own outright: the manager
//! (`UmIf`), the enclosing unit's identity (`UnitBase`), the reliability
//! handle, and the reliability-database rows (`SocketRe`).
use crate::rentry::{SocketCommand, SocketRe, SocketRePort, SocketResult, SocketState};
use libsysmaster::rel::Reliability;
use libsysmaster::unit::{UmIf, UnitBase};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) struct SocketUnitComm {
    owner: RefCell<Option<Weak<dyn UnitBase>>>,
    um: RefCell<Option<Weak<dyn UmIf>>>,
    reli: RefCell<Option<Rc<Reliability>>>,
    rentry: Rc<SocketRe>,
}

impl SocketUnitComm {
    pub(crate) fn new() -> Self {
        SocketUnitComm {
            owner: RefCell::new(None),
            um: RefCell::new(None),
            reli: RefCell::new(None),
            rentry: SocketRe::new(),
        }
    }

    pub(crate) fn attach_unit(&self, unit: Rc<dyn UnitBase>) {
        *self.owner.borrow_mut() = Some(Rc::downgrade(&unit));
    }

    pub(crate) fn attach_um(&self, um: Rc<dyn UmIf>) {
        *self.um.borrow_mut() = Some(Rc::downgrade(&um));
    }

    pub(crate) fn attach_reli(&self, reli: Rc<Reliability>) {
        *self.reli.borrow_mut() = Some(reli);
    }

    /// the enclosing unit, or `None` if it has since been unloaded. Weak by
    /// design — see the back-reference design note in SPEC_FULL.md.
    pub(crate) fn owner(&self) -> Option<Rc<dyn UnitBase>> {
        self.owner.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn um(&self) -> Rc<dyn UmIf> {
        self.um
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("unit manager not attached")
    }

    pub(crate) fn reli(&self) -> Rc<Reliability> {
        self.reli
            .borrow()
            .clone()
            .expect("reliability handle not attached")
    }

    pub(crate) fn rentry(&self) -> Rc<SocketRe> {
        Rc::clone(&self.rentry)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn rentry_mng_insert(
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
        self.rentry.mng_insert(
            state,
            result,
            control_pid,
            control_cmd_type,
            control_cmd_len,
            refused,
            n_accepted,
            ports,
        );
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn rentry_mng_get(
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
        self.rentry.mng_get()
    }
}
