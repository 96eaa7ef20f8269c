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

//! runs one hook (`StartPre`/`StartChown`/`StartPost`/`StopPre`/`StopPost`)
//! through the manager's `ProcessSpawner`. The socket unit never forks
//! directly — that machinery (credential resolution, cgroup placement) is
//! the manager's job.
use crate::comm::SocketUnitComm;
use libsysmaster::error::Result;
use libsysmaster::exec::{ExecCommand, ExecContext};
use libsysmaster::unit::expand_argv;
use nix::unistd::Pid;
use std::rc::Rc;

pub(super) struct SocketSpawn {
    comm: Rc<SocketUnitComm>,
    exec_ctx: Rc<ExecContext>,
}

impl SocketSpawn {
    pub(super) fn new(commr: &Rc<SocketUnitComm>, exec_ctx: &Rc<ExecContext>) -> SocketSpawn {
        SocketSpawn {
            comm: Rc::clone(commr),
            exec_ctx: Rc::clone(exec_ctx),
        }
    }

    pub(super) fn exec_ctx(&self) -> Rc<ExecContext> {
        Rc::clone(&self.exec_ctx)
    }

    pub(super) fn start_socket(&self, cmd: &ExecCommand) -> Result<Pid> {
        let unit_id = self
            .comm
            .owner()
            .map(|u| u.id().to_string())
            .unwrap_or_default();
        let argv = expand_argv(cmd, &unit_id);
        self.comm
            .um()
            .spawner()
            .spawn(cmd, argv, &self.exec_ctx, &unit_id)
    }
}
