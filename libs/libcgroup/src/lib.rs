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

//! Minimal surface of the cgroup realizer used by kill operations. Actually
//! walking and creating cgroup hierarchies is the manager's job; the socket
//! unit only needs to know which mode it was asked to kill under.
use bitflags::bitflags;
use nix::unistd::Pid;

bitflags! {
    /// flags steering how a process group is torn down.
    pub struct CgFlags: u8 {
        const SIGCONT  = 1 << 0;
        const IGNORE   = 1 << 1;
    }
}

/// a realized process group the engine can signal as a whole. Creating and
/// populating it is out of scope here; implementations come from the
/// enclosing manager.
pub trait ProcessGroupRealizer {
    fn kill(&self, unit_id: &str, signal: nix::sys::signal::Signal, flags: CgFlags) -> Result<(), nix::errno::Errno>;
    fn pids(&self, unit_id: &str) -> Vec<Pid>;
}
