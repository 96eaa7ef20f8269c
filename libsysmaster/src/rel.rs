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

//! reliability bookkeeping across a controlled re-execution: every sub unit
//! implements [`ReStation`] so the manager can snapshot and restore it, and
//! [`Reliability`] carries the external fd bag plus a last-frame marker used
//! to diagnose a crash mid-reload.
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

/// hooks a sub unit implements to participate in database-backed reload:
/// `db_map`/`db_insert` move data in and out of the reliability database,
/// `entry_coldplug`/`entry_clear` (re)establish external connections
/// (timers, fd watches) that aren't themselves persisted.
pub trait ReStation {
    fn db_map(&self) {}
    fn db_insert(&self) {}
    fn entry_coldplug(&self) {}
    fn entry_clear(&self) {}
}

/// identifies which subsystem was last active when the manager is about to
/// re-exec, so a crash during that window can be attributed post-mortem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliLastFrame {
    Queue,
    SubManager,
    CgEvent,
    OtherEvent,
}

/// the external fd bag and last-frame marker shared by every sub unit.
/// Real persistence (writing this to disk) is the manager's job; this type
/// only models the surface sub units call into.
#[derive(Default)]
pub struct Reliability {
    fds: RefCell<HashMap<RawFd, RawFd>>,
    last_unit: RefCell<Option<String>>,
    last_frame: RefCell<Option<(u32, u32)>>,
}

impl Reliability {
    pub fn new() -> Self {
        Reliability::default()
    }

    /// hand a duplicated descriptor into the bag (used when collecting fds
    /// ahead of re-execution).
    pub fn fd_cloexec(&self, fd: RawFd) {
        self.fds.borrow_mut().insert(fd, fd);
    }

    /// take a previously-stashed descriptor back out of the bag; panics if
    /// it was already taken or never stashed, mirroring the corpus's
    /// `unwrap()`-on-invariant style for reliability-database lookups.
    pub fn fd_take(&self, fd: RawFd) -> RawFd {
        self.fds
            .borrow_mut()
            .remove(&fd)
            .expect("fd not present in reliability bag")
    }

    pub fn set_last_unit(&self, id: &str) {
        *self.last_unit.borrow_mut() = Some(id.to_string());
    }

    pub fn clear_last_unit(&self) {
        *self.last_unit.borrow_mut() = None;
    }

    pub fn set_last_frame2(&self, frame: u32, unit_type: u32) {
        *self.last_frame.borrow_mut() = Some((frame, unit_type));
    }

    pub fn clear_last_frame(&self) {
        *self.last_frame.borrow_mut() = None;
    }
}
