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

//! the socket unit: parses `[Socket]` sections, opens and listens on the
//! configured ports, and drives the Dead -> Listening -> Running state
//! machine that hands connections and datagrams off to the bound service.

mod base;
mod comm;
mod config;
mod dispatch;
mod load;
mod mng;
mod option;
mod pid;
mod port;
mod rentry;
mod serialize;
mod spawn;
mod unit;

use libsysmaster::rel::Reliability;
use libsysmaster::unit::{SubUnit, UmIf, UnitMngUtil};
use std::rc::Rc;

/// a loaded socket unit, kept as its concrete type alongside the erased
/// `SubUnit` handle the manager drives day to day, so the `StateSerializer`
/// snapshot/restore pair stays reachable across a controlled re-execution.
pub struct SocketHandle {
    unit: Rc<unit::SocketUnit>,
}

impl SocketHandle {
    /// the handle the manager registers and drives through `UnitManager`.
    pub fn as_sub_unit(&self) -> Rc<dyn SubUnit> {
        Rc::clone(&self.unit) as Rc<dyn SubUnit>
    }

    /// the `StateSerializer` snapshot, written ahead of a controlled
    /// re-execution.
    pub fn serialize(&self) -> String {
        self.unit.serialize()
    }

    /// restore from a snapshot produced by [`Self::serialize`]; the
    /// manager supplies no fd bag here because re-attaching descriptors
    /// across an actual re-exec is the manager's job, not this unit's.
    pub fn restore(&self, text: &str) {
        self.unit.restore(text, &[]);
    }
}

/// instantiate a socket unit for the manager; mirrors what a dynamic-reload
/// plugin host would do by looking up `SocketUnit::PLUGIN_NAME`, minus the
/// `dlopen`.
pub fn new_socket_unit(um: Rc<dyn UmIf>, reli: Rc<Reliability>) -> SocketHandle {
    log::debug!("instantiating unit type {}", unit::SocketUnit::PLUGIN_NAME);
    let unit = Rc::new(unit::SocketUnit::new_for_plugin(um));
    unit.attach_reli(reli);
    SocketHandle { unit }
}
