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

//! applies the `[Socket]` section's per-port tuning knobs to a freshly
//! opened descriptor. Every knob here is best-effort: a kernel that
//! rejects one (old kernel, missing capability, unsupported family)
//! only logs a warning and leaves the port usable, matching the
//! original's tolerant-failure posture for cosmetic socket options.
use crate::config::SocketConfig;
use nix::sys::socket::sockopt;
use nix::sys::socket::{setsockopt, AddressFamily};
use std::os::unix::io::RawFd;

fn warn_failed(unit_id: &str, opt: &str, err: impl std::fmt::Display) {
    log::warn!("{}: failed to set {}, ignoring: {}", unit_id, opt, err);
}

/// `setsockopt(2)` for the handful of int-valued options (`SO_PRIORITY`,
/// `IP_TOS`, `IP_FREEBIND`, `IP_TRANSPARENT`) nix 0.24 doesn't wrap.
pub(super) fn set_raw_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: i32) -> std::io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub(super) struct OptionApplier<'a> {
    unit_id: &'a str,
    config: &'a SocketConfig,
}

impl<'a> OptionApplier<'a> {
    pub(super) fn new(unit_id: &'a str, config: &'a SocketConfig) -> Self {
        OptionApplier { unit_id, config }
    }

    /// apply every configured option to `fd`, which must already be bound
    /// (but not yet listening). `family` is `None` for fifo/special ports,
    /// which skip every socket-only knob.
    pub(super) fn apply(&self, fd: RawFd, family: Option<AddressFamily>) {
        if self.config.keep_alive() {
            if let Err(e) = setsockopt(fd, sockopt::KeepAlive, &true) {
                warn_failed(self.unit_id, "SO_KEEPALIVE", e);
            }
        }

        if self.config.broadcast() {
            if let Err(e) = setsockopt(fd, sockopt::Broadcast, &true) {
                warn_failed(self.unit_id, "SO_BROADCAST", e);
            }
        }

        if self.config.pass_credentials() {
            if let Err(e) = setsockopt(fd, sockopt::PassCred, &true) {
                warn_failed(self.unit_id, "SO_PASSCRED", e);
            }
        }

        if self.config.pass_security() {
            if let Err(e) = set_raw_int(fd, libc::SOL_SOCKET, libc::SO_PASSSEC, 1) {
                warn_failed(self.unit_id, "SO_PASSSEC", e);
            }
        }

        if self.config.reuse_port() {
            if let Err(e) = setsockopt(fd, sockopt::ReusePort, &true) {
                warn_failed(self.unit_id, "SO_REUSEPORT", e);
            }
        }

        if let Some(size) = self.config.receive_buffer() {
            if setsockopt(fd, sockopt::RcvBufForce, &(size as usize)).is_err() {
                if let Err(e) = setsockopt(fd, sockopt::RcvBuf, &(size as usize)) {
                    warn_failed(self.unit_id, "SO_RCVBUF", e);
                }
            }
        }

        if let Some(size) = self.config.send_buffer() {
            if setsockopt(fd, sockopt::SndBufForce, &(size as usize)).is_err() {
                if let Err(e) = setsockopt(fd, sockopt::SndBuf, &(size as usize)) {
                    warn_failed(self.unit_id, "SO_SNDBUF", e);
                }
            }
        }

        if let Some(mark) = self.config.mark() {
            if let Err(e) = setsockopt(fd, sockopt::Mark, &(mark as u32)) {
                warn_failed(self.unit_id, "SO_MARK", e);
            }
        }

        if let Some(priority) = self.config.priority() {
            if let Err(e) = set_raw_int(fd, libc::SOL_SOCKET, libc::SO_PRIORITY, priority) {
                warn_failed(self.unit_id, "SO_PRIORITY", e);
            }
        }

        if let Some(cong) = self.config.tcp_congestion() {
            let cong = std::ffi::OsString::from(cong);
            if let Err(e) = setsockopt(fd, sockopt::TcpCongestion, &cong) {
                warn_failed(self.unit_id, "TCP_CONGESTION", e);
            }
        }

        match family {
            Some(AddressFamily::Inet) => {
                if let Some(tos) = self.config.ip_tos() {
                    if let Err(e) = set_raw_int(fd, libc::IPPROTO_IP, libc::IP_TOS, tos) {
                        warn_failed(self.unit_id, "IP_TOS", e);
                    }
                }
                if let Some(ttl) = self.config.ip_ttl() {
                    if let Err(e) = setsockopt(fd, sockopt::Ipv4Ttl, &ttl) {
                        warn_failed(self.unit_id, "IP_TTL", e);
                    }
                }
            }
            Some(AddressFamily::Inet6) => {
                if let Some(ttl) = self.config.ip_ttl() {
                    if let Err(e) = setsockopt(fd, sockopt::Ipv6Ttl, &ttl) {
                        warn_failed(self.unit_id, "IPV6_UNICAST_HOPS", e);
                    }
                }
            }
            _ => {}
        }

        self.apply_smack(fd, family);
    }

    pub(super) fn apply_smack(&self, fd: RawFd, family: Option<AddressFamily>) {
        if family.is_none() {
            if let Some(label) = self.config.smack_label() {
                if let Err(e) = xattr::set(format!("/proc/self/fd/{}", fd), "security.SMACK64", label.as_bytes()) {
                    warn_failed(self.unit_id, "SMACK64", e);
                }
            }
            return;
        }

        if let Some(label) = self.config.smack_label_ip_in() {
            if let Err(e) = xattr::set(format!("/proc/self/fd/{}", fd), "security.SMACK64IPIN", label.as_bytes()) {
                warn_failed(self.unit_id, "SMACK64IPIN", e);
            }
        }
        if let Some(label) = self.config.smack_label_ip_out() {
            if let Err(e) = xattr::set(format!("/proc/self/fd/{}", fd), "security.SMACK64IPOUT", label.as_bytes()) {
                warn_failed(self.unit_id, "SMACK64IPOUT", e);
            }
        }
    }

    /// `F_SETPIPE_SZ`, applied after a FIFO is opened.
    pub(super) fn apply_pipe_size(&self, fd: RawFd) {
        if let Some(size) = self.config.pipe_size() {
            let ret = unsafe { libc::fcntl(fd, libc::F_SETPIPE_SZ, size) };
            if ret < 0 {
                warn_failed(
                    self.unit_id,
                    "F_SETPIPE_SZ",
                    std::io::Error::last_os_error(),
                );
            }
        }
    }
}
