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

//! a monotonic one-shot deadline. Built on `timerfd` so it can sit in the
//! same epoll set as any other [`Source`](crate::Source) — a unit arms it
//! through `Timer::set`, then registers `Timer::fd` the same way it
//! registers a listening socket.
use libc::{
    clock_gettime, itimerspec, timerfd_create, timerfd_gettime, timerfd_settime, timespec,
    CLOCK_MONOTONIC, TFD_CLOEXEC, TFD_NONBLOCK,
};
use std::io;
use std::os::unix::io::RawFd;

pub struct Timer {
    fd: RawFd,
}

fn usec_to_timespec(usec: u64) -> timespec {
    timespec {
        tv_sec: (usec / 1_000_000) as i64,
        tv_nsec: ((usec % 1_000_000) * 1_000) as i64,
    }
}

impl Timer {
    pub fn new() -> io::Result<Timer> {
        let fd = unsafe { timerfd_create(CLOCK_MONOTONIC, TFD_CLOEXEC | TFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Timer { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// arm (or rearm) the timer to fire `usec_from_now` microseconds from
    /// now. At most one deadline is ever pending, matching invariant 4 of
    /// the state machine (a fresh `set` replaces any previous deadline).
    pub fn set(&self, usec_from_now: u64) -> io::Result<()> {
        let spec = itimerspec {
            it_interval: usec_to_timespec(0),
            it_value: usec_to_timespec(usec_from_now.max(1)),
        };
        let ret = unsafe { timerfd_settime(self.fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn disarm(&self) -> io::Result<()> {
        let spec = itimerspec {
            it_interval: usec_to_timespec(0),
            it_value: usec_to_timespec(0),
        };
        let ret = unsafe { timerfd_settime(self.fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// microseconds remaining until expiry, 0 if disarmed or already due.
    pub fn remaining_usec(&self) -> u64 {
        let mut spec = itimerspec {
            it_interval: usec_to_timespec(0),
            it_value: usec_to_timespec(0),
        };
        if unsafe { timerfd_gettime(self.fd, &mut spec) } != 0 {
            return 0;
        }
        spec.it_value.tv_sec as u64 * 1_000_000 + spec.it_value.tv_nsec as u64 / 1_000
    }

    /// drain the expiration counter so the fd stops reporting readable.
    pub fn ack(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// current monotonic time in microseconds, the unit the rest of the state
/// machine's deadlines are expressed in.
pub fn now_usec() -> u64 {
    let mut ts = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        clock_gettime(CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}
