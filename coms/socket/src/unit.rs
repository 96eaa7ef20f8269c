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

//! SocketUnit is the entrance of the sub unit, implementing the traits
//! `SubUnit`, `UnitMngUtil` and `ReStation`. It owns the config, the
//! state machine and the post-load verifier, and forwards every
//! `UnitManager` callback to them.

use crate::{
    base::PLUGIN_NAME, comm::SocketUnitComm, config::SocketConfig, load::SocketLoad, mng::SocketMng,
};
use libsysmaster::error::*;
use libsysmaster::exec::ExecContext;
use libsysmaster::rel::{ReStation, Reliability};
use libsysmaster::unit::{SubUnit, UmIf, UnitActiveState, UnitBase, UnitMngUtil};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::{path::PathBuf, rc::Rc};

pub(crate) struct SocketUnit {
    comm: Rc<SocketUnitComm>,
    config: Rc<SocketConfig>,
    mng: SocketMng,
    load: SocketLoad,
}

impl ReStation for SocketUnit {
    fn db_map(&self) {
        self.config.db_map();
        self.mng.db_map();
    }

    fn db_insert(&self) {
        self.config.db_insert();
        self.mng.db_insert();
    }

    fn entry_coldplug(&self) {
        self.mng.entry_coldplug();
    }

    fn entry_clear(&self) {
        self.mng.entry_clear();
    }
}

impl SubUnit for SocketUnit {
    fn load(&self, paths: Vec<PathBuf>) -> Result<()> {
        log::debug!("socket begin to load conf file");
        self.config.load(paths)?;

        self.mng.build_ports();

        self.load.socket_add_extras();
        self.load.socket_verify()
    }

    fn start(&self) -> Result<()> {
        let starting = self.mng.start_check()?;
        if starting {
            log::debug!("socket already in start");
            return Ok(());
        }

        self.mng.start_action();

        Ok(())
    }

    fn stop(&self, force: bool) -> Result<()> {
        if !force {
            let stopping = self.mng.stop_check()?;
            if stopping {
                log::debug!("socket already in stop, return immediately");
                return Ok(());
            }
        }

        self.mng.stop_action();

        Ok(())
    }

    fn sigchld_events(&self, pid: Pid, code: i32, signal: Option<Signal>) {
        self.mng.sigchld_event(pid, code, signal)
    }

    fn current_active_state(&self) -> UnitActiveState {
        self.mng.current_active_state()
    }

    fn get_subunit_state(&self) -> String {
        self.mng.get_state()
    }

    fn collect_fds(&self) -> Vec<i32> {
        self.mng.collect_fds()
    }

    fn attach_unit(&self, unit: Rc<dyn UnitBase>) {
        self.comm.attach_unit(unit);
        self.db_insert();
    }
}

impl SocketUnit {
    /// the `StateSerializer` snapshot, for a manager about to re-exec.
    pub(crate) fn serialize(&self) -> String {
        self.mng.serialize()
    }

    /// restore from a snapshot written by [`Self::serialize`], reattaching
    /// fds handed across the re-exec in `bag`.
    pub(crate) fn restore(&self, text: &str, bag: &[crate::serialize::FdBagEntry]) {
        self.mng.restore(text, bag)
    }
}

impl UnitMngUtil for SocketUnit {
    fn attach_um(&self, um: Rc<dyn UmIf>) {
        self.comm.attach_um(um);
    }

    fn attach_reli(&self, reli: Rc<Reliability>) {
        self.comm.attach_reli(reli);
    }
}

impl SocketUnit {
    fn new(um: Rc<dyn UmIf>) -> SocketUnit {
        let context = ExecContext::new();
        let _comm = Rc::new(SocketUnitComm::new());
        _comm.attach_um(um);
        let _config = Rc::new(SocketConfig::new(&_comm));
        SocketUnit {
            comm: Rc::clone(&_comm),
            config: Rc::clone(&_config),
            mng: SocketMng::new(&_comm, &_config, &context),
            load: SocketLoad::new(&_config),
        }
    }
}

use libsysmaster::declure_unitobj_plugin_with_param;
declure_unitobj_plugin_with_param!(SocketUnit, SocketUnit::new, PLUGIN_NAME);
