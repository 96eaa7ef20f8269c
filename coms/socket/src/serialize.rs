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

//! the textual snapshot written before a controlled re-execution and read
//! back from it afterward. Each line is `key=value`; unknown keys are
//! logged and skipped rather than rejected, so a newer manager can read a
//! snapshot written by an older one (and vice versa) without losing the
//! whole socket's state across the jump.
use crate::rentry::{PortType, SocketCommand, SocketRePort, SocketResult, SocketState};
use std::os::unix::io::RawFd;
use std::str::FromStr;

/// one fd passed alongside the textual snapshot, keyed the same way
/// `SocketRePort` is keyed so `distribute_fds` can match them back up by
/// structural equality (kind + listen string) rather than by position.
#[derive(Debug, Clone)]
pub(super) struct FdBagEntry {
    pub p_type: PortType,
    pub listen: String,
    pub fd: RawFd,
}

/// everything `serialize`/`deserialize_item` round-trip for one socket
/// unit, already split into typed fields instead of raw text.
#[derive(Debug, Clone)]
pub(super) struct SocketSnapshot {
    pub state: SocketState,
    pub result: SocketResult,
    pub control_pid: Option<i32>,
    pub control_cmd_type: Option<SocketCommand>,
    pub control_cmd_len: usize,
    pub refused: i32,
    pub n_accepted: u32,
    pub ports: Vec<SocketRePort>,
    pub tmp_dir: Option<String>,
    pub var_tmp_dir: Option<String>,
}

/// render a snapshot as the newline-separated `key=value` text the
/// reliability database stores. The `n-fd-store`-style block (fd-bag
/// entries) comes out as repeated `port=` lines tagged with an index the
/// fd bag was handed to the manager under.
pub(super) fn serialize(snap: &SocketSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("state={}\n", snap.state));
    out.push_str(&format!("result={}\n", snap.result));
    if let Some(pid) = snap.control_pid {
        out.push_str(&format!("control-pid={}\n", pid));
    }
    if let Some(cmd) = snap.control_cmd_type {
        out.push_str(&format!("control-command={:?}\n", cmd));
    }
    out.push_str(&format!("control-command-len={}\n", snap.control_cmd_len));
    out.push_str(&format!("n-refused={}\n", snap.refused));
    out.push_str(&format!("n-accepted={}\n", snap.n_accepted));
    if let Some(dir) = &snap.tmp_dir {
        out.push_str(&format!("tmp-dir={}\n", dir));
    }
    if let Some(dir) = &snap.var_tmp_dir {
        out.push_str(&format!("var-tmp-dir={}\n", dir));
    }
    for (idx, port) in snap.ports.iter().enumerate() {
        out.push_str(&format!(
            "port={:?} {} {}\n",
            port.p_type, port.listen, idx
        ));
    }
    out
}

/// parse a snapshot written by `serialize`. A line whose key isn't
/// recognized is logged at debug and skipped — forward compatibility
/// with a snapshot written by a newer build that added fields.
pub(super) fn deserialize(text: &str) -> Option<SocketSnapshot> {
    let mut state = None;
    let mut result = None;
    let mut control_pid = None;
    let mut control_cmd_type = None;
    let mut control_cmd_len = 0usize;
    let mut refused = 0i32;
    let mut n_accepted = 0u32;
    let mut tmp_dir = None;
    let mut var_tmp_dir = None;
    let mut ports = Vec::new();

    for line in text.lines() {
        let (key, value) = match line.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        match key {
            "state" => state = SocketState::from_str(value).ok(),
            "result" => result = SocketResult::from_str(value).ok(),
            "control-pid" => control_pid = value.parse().ok(),
            "control-command" => control_cmd_type = parse_command(value),
            "control-command-len" => control_cmd_len = value.parse().unwrap_or(0),
            "n-refused" => refused = value.parse().unwrap_or(0),
            "n-accepted" => n_accepted = value.parse().unwrap_or(0),
            "tmp-dir" => tmp_dir = Some(value.to_string()),
            "var-tmp-dir" => var_tmp_dir = Some(value.to_string()),
            "port" => {
                if let Some(port) = parse_port_line(value) {
                    ports.push(port);
                }
            }
            other => log::debug!("ignoring unknown reliability-database key: {}", other),
        }
    }

    Some(SocketSnapshot {
        state: state?,
        result: result?,
        control_pid,
        control_cmd_type,
        control_cmd_len,
        refused,
        n_accepted,
        ports,
        tmp_dir,
        var_tmp_dir,
    })
}

fn parse_command(value: &str) -> Option<SocketCommand> {
    match value {
        "StartPre" => Some(SocketCommand::StartPre),
        "StartPost" => Some(SocketCommand::StartPost),
        "StopPre" => Some(SocketCommand::StopPre),
        "StopPost" => Some(SocketCommand::StopPost),
        _ => None,
    }
}

fn parse_port_line(value: &str) -> Option<SocketRePort> {
    let mut words = value.splitn(3, ' ');
    let p_type = match words.next()? {
        "Socket" => PortType::Socket,
        "Fifo" => PortType::Fifo,
        "Special" => PortType::Special,
        "MessageQueue" => PortType::MessageQueue,
        _ => return None,
    };
    let listen = words.next()?.to_string();
    let _fd_index = words.next()?;
    Some(SocketRePort {
        p_type,
        listen,
        fd: -1,
    })
}

/// reattach fds from `bag` onto `ports` by matching `(p_type, listen)`
/// pairs, the structural-equality rule `StateSerializer` uses instead of
/// trusting positional ordering across a re-exec.
pub(super) fn distribute_fds(ports: &mut [SocketRePort], bag: &[FdBagEntry]) {
    for port in ports.iter_mut() {
        if let Some(entry) = bag
            .iter()
            .find(|e| e.p_type == port.p_type && e.listen == port.listen)
        {
            port.fd = entry.fd;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_snapshot_round_trips() {
        let snap = SocketSnapshot {
            state: SocketState::Dead,
            result: SocketResult::Success,
            control_pid: None,
            control_cmd_type: None,
            control_cmd_len: 0,
            refused: 0,
            n_accepted: 3,
            ports: vec![SocketRePort {
                p_type: PortType::Socket,
                listen: "/run/demo.sock".to_string(),
                fd: -1,
            }],
            tmp_dir: Some("/tmp/systemd-private-demo".to_string()),
            var_tmp_dir: None,
        };

        let text = serialize(&snap);
        let back = deserialize(&text).unwrap();

        assert_eq!(back.state, snap.state);
        assert_eq!(back.result, snap.result);
        assert_eq!(back.n_accepted, snap.n_accepted);
        assert_eq!(back.control_pid, snap.control_pid);
        assert_eq!(back.tmp_dir, snap.tmp_dir);
        assert_eq!(back.var_tmp_dir, snap.var_tmp_dir);
        assert_eq!(back.ports.len(), 1);
        assert_eq!(back.ports[0].listen, "/run/demo.sock");
    }

    #[test]
    fn distribute_fds_matches_by_kind_and_listen_path() {
        let mut ports = vec![SocketRePort {
            p_type: PortType::Socket,
            listen: "/run/demo.sock".to_string(),
            fd: -1,
        }];
        let bag = vec![FdBagEntry {
            p_type: PortType::Socket,
            listen: "/run/demo.sock".to_string(),
            fd: 7,
        }];

        distribute_fds(&mut ports, &bag);

        assert_eq!(ports[0].fd, 7);
    }

    #[test]
    fn unknown_keys_are_ignored_not_rejected() {
        let text = "state=Dead\nresult=Success\nbogus-future-key=1\n";
        let snap = deserialize(text).unwrap();
        assert_eq!(snap.state, SocketState::Dead);
    }
}
