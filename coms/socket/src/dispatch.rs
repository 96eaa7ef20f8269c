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

//! `Accept=yes` connection handling: one call per readiness event, never a
//! loop — the event loop will come right back if more connections are
//! pending. `MaxConnections` is enforced before the accepted fd is handed
//! to the manager, so a socket under load fails fast instead of spawning
//! unbounded service instances.
use crate::port::SocketPort;
use nix::sys::socket::{self, SockaddrStorage};
use nix::unistd;
use std::os::unix::io::RawFd;

pub(super) enum AcceptOutcome {
    /// a connection was accepted and should be handed off to a new
    /// service instance named `instance`.
    Accepted { cfd: RawFd, instance: String },
    /// the queue was at `MaxConnections`; the connection was accepted
    /// and immediately dropped to keep the backlog from growing.
    Refused,
    /// nothing was actually pending (the peer went away between
    /// readiness notification and `accept`, or another waiter won it).
    WouldBlock,
}

/// accept exactly one pending connection on `port`. `n_accepted` is the
/// running count before this acceptance and is only advanced by the caller
/// once the template service has actually been set up, per the manager's
/// ordering rule.
pub(super) fn accept_one(
    port: &SocketPort,
    max_connections: u32,
    n_connections: u32,
    n_accepted: u32,
) -> AcceptOutcome {
    let cfd = match port.accept() {
        Ok(fd) => fd,
        Err(nix::errno::Errno::EAGAIN) => {
            return AcceptOutcome::WouldBlock;
        }
        Err(nix::errno::Errno::ECONNABORTED)
        | Err(nix::errno::Errno::EINTR)
        | Err(nix::errno::Errno::ENOTCONN) => {
            return AcceptOutcome::WouldBlock;
        }
        Err(e) => {
            log::warn!("{}: accept failed, ignoring: {}", port.listen(), e);
            return AcceptOutcome::WouldBlock;
        }
    };

    if n_connections >= max_connections {
        log::warn!(
            "{}: too many connections ({} >= {}), refusing",
            port.listen(),
            n_connections,
            max_connections
        );
        let _ = unistd::close(cfd);
        return AcceptOutcome::Refused;
    }

    let instance = instance_name(cfd, n_accepted).unwrap_or_else(|| format!("{}-{}", n_accepted, cfd));
    AcceptOutcome::Accepted { cfd, instance }
}

/// derive the `%i`-style instance name for a newly accepted connection:
/// `nr-local-remote` for IPv4/IPv6 peers, `nr-peerPid-peerUid` for UNIX
/// peers via `SO_PEERCRED`, matching the original's `instance_from_socket`.
fn instance_name(cfd: RawFd, nr: u32) -> Option<String> {
    let peer: SockaddrStorage = socket::getpeername(cfd).ok()?;
    let local: Option<SockaddrStorage> = socket::getsockname(cfd).ok();

    if let Some(v4) = peer.as_sockaddr_in() {
        let remote = std::net::Ipv4Addr::from(v4.ip());
        let local = local.as_ref().and_then(|l| l.as_sockaddr_in());
        return Some(match local {
            Some(l) => format!(
                "{}-{}:{}-{}:{}",
                nr,
                std::net::Ipv4Addr::from(l.ip()),
                l.port(),
                remote,
                v4.port()
            ),
            None => format!("{}-{}:{}", nr, remote, v4.port()),
        });
    }
    if let Some(v6) = peer.as_sockaddr_in6() {
        let local = local.as_ref().and_then(|l| l.as_sockaddr_in6());
        return Some(match local {
            Some(l) => format!("{}-{}:{}-{}:{}", nr, l.ip(), l.port(), v6.ip(), v6.port()),
            None => format!("{}-{}:{}", nr, v6.ip(), v6.port()),
        });
    }
    if peer.as_unix_addr().is_some() {
        if let Ok(cred) = socket::getsockopt(cfd, socket::sockopt::PeerCredentials) {
            return Some(format!("{}-{}-{}", nr, cred.pid(), cred.uid()));
        }
        return Some(format!("{}-unix", nr));
    }

    None
}
