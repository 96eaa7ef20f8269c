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

//! child-reap primitive: a SIGCHLD self-pipe registered once with the
//! manager's `Events`; units `subscribe`/`unsubscribe` a pid and get
//! notified through [`PidHandler`] when it exits.
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;

pub trait PidHandler {
    fn on_exit(&self, pid: Pid, status: WaitStatus);
}

pub struct ChildWatch {
    read_fd: RawFd,
    handlers: RefCell<HashMap<i32, Rc<dyn PidHandler>>>,
}

impl ChildWatch {
    pub fn new() -> std::io::Result<Rc<ChildWatch>> {
        let (read_fd, write_fd) = nix::unistd::pipe()
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
        signal_hook::low_level::pipe::register_raw(signal_hook::consts::SIGCHLD, write_fd)?;
        Ok(Rc::new(ChildWatch {
            read_fd,
            handlers: RefCell::new(HashMap::new()),
        }))
    }

    pub fn subscribe(&self, pid: Pid, handler: Rc<dyn PidHandler>) {
        self.handlers.borrow_mut().insert(pid.as_raw(), handler);
    }

    pub fn unsubscribe(&self, pid: Pid) {
        self.handlers.borrow_mut().remove(&pid.as_raw());
    }

    /// reap every exited child currently pending and dispatch to any
    /// subscribed handler; pids nobody subscribed to (e.g. a grandchild of
    /// a hook) are reaped and dropped, since the corpus routes exits solely
    /// through the tracked `control_pid`.
    pub fn reap(&self) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(status) => {
                    let pid = match status {
                        WaitStatus::Exited(p, _)
                        | WaitStatus::Signaled(p, _, _)
                        | WaitStatus::Stopped(p, _)
                        | WaitStatus::Continued(p) => p,
                        _ => continue,
                    };
                    if let Some(handler) = self.handlers.borrow_mut().remove(&pid.as_raw()) {
                        handler.on_exit(pid, status);
                    }
                }
            }
        }
    }
}

impl crate::Source for ChildWatch {
    fn fd(&self) -> RawFd {
        self.read_fd
    }

    fn event_type(&self) -> crate::EventType {
        crate::EventType::Io
    }

    fn epoll_event(&self) -> i32 {
        libc::EPOLLIN as i32
    }

    fn dispatch(&self, _events: &crate::Events) -> i32 {
        let mut buf = [0u8; 64];
        unsafe {
            libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
        }
        self.reap();
        0
    }

    fn token(&self) -> u64 {
        self.read_fd as u64
    }
}
