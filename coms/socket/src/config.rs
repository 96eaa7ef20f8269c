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

//! socket_config mod load the conf file list and convert it to structure which is defined in this mod.
//!
#![allow(non_snake_case)]
use crate::base::NetlinkProtocol;
use crate::comm::SocketUnitComm;
use crate::rentry::{PortType, SectionSocket, SocketCommand};
use confique::Config;
use libsysmaster::error::*;
use libsysmaster::exec::ExecCommand;
use libsysmaster::rel::ReStation;
use libsysmaster::unit::KillContext;
use libutils::socket_util;
use nix::sys::socket::{
    AddressFamily, NetlinkAddr, SockType, SockaddrIn, SockaddrIn6, SockaddrLike, UnixAddr,
};
use std::cell::RefCell;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Default)]
pub(super) struct UnitRef {
    target: Option<String>,
}

impl UnitRef {
    pub(super) fn new() -> Self {
        UnitRef::default()
    }

    pub(super) fn set_ref(&mut self, target: String) {
        self.target = Some(target);
    }

    pub(super) fn target(&self) -> Option<&String> {
        self.target.as_ref()
    }
}

pub(super) struct SocketConfig {
    comm: Rc<SocketUnitComm>,
    data: Rc<RefCell<SocketConfigData>>,
    service: RefCell<UnitRef>,
    ports: RefCell<Vec<Rc<SocketPortConf>>>,
    kill_context: Rc<KillContext>,
}

impl ReStation for SocketConfig {
    fn db_map(&self) {}
    fn db_insert(&self) {}
}

impl SocketConfig {
    pub(super) fn new(commr: &Rc<SocketUnitComm>) -> Self {
        SocketConfig {
            comm: Rc::clone(commr),
            data: Rc::new(RefCell::new(SocketConfigData::default())),
            service: RefCell::new(UnitRef::new()),
            ports: RefCell::new(Vec::new()),
            kill_context: Rc::new(KillContext::default()),
        }
    }

    pub(super) fn reset(&self) {
        self.data.replace(SocketConfigData::default());
        self.service.replace(UnitRef::new());
        self.ports.replace(Vec::new());
    }

    pub(super) fn load(&self, paths: Vec<PathBuf>) -> Result<()> {
        let mut builder = SocketConfigData::builder().env();
        for v in paths {
            builder = builder.file(v);
        }
        let data = builder.load().context(Confique)?;

        *self.data.borrow_mut() = data;
        self.parse_kill_context();

        let ret1 = self.parse_service();
        let ret2 = self.parse_port();
        if ret1.is_err() || ret2.is_err() {
            self.reset();
            return ret1.and(ret2);
        }

        Ok(())
    }

    pub(super) fn config_data(&self) -> Rc<RefCell<SocketConfigData>> {
        self.data.clone()
    }

    pub(super) fn get_exec_cmds(&self, cmd_type: SocketCommand) -> Option<Vec<ExecCommand>> {
        self.data.borrow().get_exec_cmds(cmd_type)
    }

    pub(super) fn set_unit_ref(&self, service: String) -> Result<()> {
        if !self.comm.um().load_unit_success(&service) {
            return Err(format!("failed to load unit {service}").into());
        }
        self.service.borrow_mut().set_ref(service);
        Ok(())
    }

    pub(super) fn unit_ref_target(&self) -> Option<String> {
        self.service.borrow().target().cloned()
    }

    pub(super) fn ports(&self) -> Vec<Rc<SocketPortConf>> {
        self.ports.borrow().iter().cloned().collect::<_>()
    }

    pub(super) fn accept(&self) -> bool {
        self.data.borrow().Socket.Accept
    }

    pub(super) fn max_connections(&self) -> u32 {
        self.data.borrow().Socket.MaxConnections
    }

    pub(super) fn backlog(&self) -> usize {
        self.data
            .borrow()
            .Socket
            .Backlog
            .map(|v| v as usize)
            .unwrap_or(libc::SOMAXCONN as usize)
    }

    pub(super) fn directory_mode(&self) -> u32 {
        parse_octal(&self.data.borrow().Socket.DirectoryMode, 0o755)
    }

    pub(super) fn socket_mode(&self) -> u32 {
        parse_octal(&self.data.borrow().Socket.SocketMode, 0o666)
    }

    pub(super) fn timeout_usec(&self) -> u64 {
        self.data.borrow().Socket.TimeoutSec
    }

    pub(super) fn keep_alive(&self) -> bool {
        self.data.borrow().Socket.KeepAlive
    }

    pub(super) fn broadcast(&self) -> bool {
        self.data.borrow().Socket.Broadcast
    }

    pub(super) fn pass_credentials(&self) -> bool {
        self.data.borrow().Socket.PassCredentials
    }

    pub(super) fn pass_security(&self) -> bool {
        self.data.borrow().Socket.PassSecurity
    }

    pub(super) fn send_sigkill(&self) -> bool {
        self.data.borrow().Socket.SendSIGKILL
    }

    pub(super) fn reuse_port(&self) -> bool {
        self.data.borrow().Socket.ReusePort
    }

    pub(super) fn receive_buffer(&self) -> Option<u64> {
        self.data.borrow().Socket.ReceiveBuffer
    }

    pub(super) fn send_buffer(&self) -> Option<u64> {
        self.data.borrow().Socket.SendBuffer
    }

    pub(super) fn mark(&self) -> Option<i32> {
        self.data.borrow().Socket.Mark
    }

    pub(super) fn priority(&self) -> Option<i32> {
        let p = self.data.borrow().Socket.Priority;
        if p == -1 {
            None
        } else {
            Some(p)
        }
    }

    pub(super) fn tcp_congestion(&self) -> Option<String> {
        self.data.borrow().Socket.TCPCongestion.clone()
    }

    pub(super) fn ip_tos(&self) -> Option<i32> {
        self.data.borrow().Socket.IPTOS
    }

    pub(super) fn ip_ttl(&self) -> Option<i32> {
        self.data.borrow().Socket.IPTTL
    }

    pub(super) fn pipe_size(&self) -> Option<i32> {
        self.data.borrow().Socket.PipeSize
    }

    pub(super) fn smack_label(&self) -> Option<String> {
        self.data.borrow().Socket.SmackLabel.clone()
    }

    pub(super) fn smack_label_ip_in(&self) -> Option<String> {
        self.data.borrow().Socket.SmackLabelIPIn.clone()
    }

    pub(super) fn smack_label_ip_out(&self) -> Option<String> {
        self.data.borrow().Socket.SmackLabelIPOut.clone()
    }

    pub(super) fn free_bind(&self) -> bool {
        self.data.borrow().Socket.FreeBind
    }

    pub(super) fn transparent(&self) -> bool {
        self.data.borrow().Socket.Transparent
    }

    pub(super) fn bind_ipv6_only(&self) -> bool {
        self.data.borrow().Socket.BindIPv6Only
    }

    pub(super) fn bind_to_device(&self) -> Option<String> {
        self.data.borrow().Socket.BindToDevice.clone()
    }

    pub(super) fn socket_user(&self) -> Option<String> {
        self.data.borrow().Socket.SocketUser.clone()
    }

    pub(super) fn socket_group(&self) -> Option<String> {
        self.data.borrow().Socket.SocketGroup.clone()
    }

    pub(super) fn message_queue_max_messages(&self) -> i64 {
        self.data.borrow().Socket.MessageQueueMaxMessages
    }

    pub(super) fn message_queue_message_size(&self) -> i64 {
        self.data.borrow().Socket.MessageQueueMessageSize
    }

    fn parse_service(&self) -> Result<()> {
        if let Some(service) = self.config_data().borrow().Socket.Service.clone() {
            if !service.ends_with(".service") {
                return Err("socket service must be end with .service"
                    .to_string()
                    .into());
            }
            self.set_unit_ref(service)?;
        }
        Ok(())
    }

    fn parse_port(&self) -> Result<()> {
        log::debug!("begin to parse socket section");
        self.parse_sockets(ListeningItem::Stream, SockType::Stream)?;
        self.parse_sockets(ListeningItem::Datagram, SockType::Datagram)?;
        self.parse_sockets(ListeningItem::SequentialPacket, SockType::SeqPacket)?;
        self.parse_netlink()?;
        self.parse_paths(PortType::Fifo, &self.config_data().borrow().Socket.ListenFIFO.clone().unwrap_or_default())?;
        self.parse_paths(
            PortType::Special,
            &self.config_data().borrow().Socket.ListenSpecial.clone().unwrap_or_default(),
        )?;
        self.parse_paths(
            PortType::MessageQueue,
            &self
                .config_data()
                .borrow()
                .Socket
                .ListenMessageQueue
                .clone()
                .unwrap_or_default(),
        )?;
        Ok(())
    }

    fn parse_sockets(&self, item: ListeningItem, socket_type: SockType) -> Result<()> {
        let listens = match item {
            ListeningItem::Stream => self.config_data().borrow().Socket.ListenStream.clone().unwrap_or_default(),
            ListeningItem::Datagram => self.config_data().borrow().Socket.ListenDatagram.clone().unwrap_or_default(),
            ListeningItem::SequentialPacket => self
                .config_data()
                .borrow()
                .Socket
                .ListenSequentialPacket
                .clone()
                .unwrap_or_default(),
        };

        for v in &listens {
            if v.is_empty() {
                continue;
            }
            match parse_socket_address(v, socket_type) {
                Ok(sa) => {
                    let port = SocketPortConf::new_socket(sa, v);
                    self.push_port(Rc::new(port));
                }
                Err(_) => {
                    log::error!("parsing listening socket failed: {}", v);
                    return Err(format!("parsing listening socket failed: {v}").into());
                }
            }
        }
        Ok(())
    }

    fn parse_netlink(&self) -> Result<()> {
        for v in &self.config_data().borrow().Socket.ListenNetlink.clone().unwrap_or_default() {
            if v.is_empty() {
                continue;
            }
            let sa = parse_netlink_address(v)?;
            let port = SocketPortConf::new_socket(sa, v);
            self.push_port(Rc::new(port));
        }
        Ok(())
    }

    fn parse_paths(&self, p_type: PortType, listens: &[String]) -> Result<()> {
        for v in listens {
            if v.is_empty() {
                continue;
            }
            self.push_port(Rc::new(SocketPortConf::new_path(p_type, v)));
        }
        Ok(())
    }

    fn push_port(&self, port: Rc<SocketPortConf>) {
        self.ports.borrow_mut().push(port);
    }

    pub(super) fn kill_context(&self) -> Rc<KillContext> {
        self.kill_context.clone()
    }

    fn parse_kill_context(&self) {
        self.kill_context
            .set_kill_mode(self.config_data().borrow().Socket.kill_mode());
    }
}

fn parse_octal(s: &str, default: u32) -> u32 {
    u32::from_str_radix(s, 8).unwrap_or(default)
}

enum ListeningItem {
    Stream,
    Datagram,
    SequentialPacket,
}

#[derive(Config, Default, Debug)]
pub(crate) struct SocketConfigData {
    #[config(nested)]
    pub Socket: SectionSocket,
}

impl SocketConfigData {
    pub(self) fn get_exec_cmds(&self, cmd_type: SocketCommand) -> Option<Vec<ExecCommand>> {
        match cmd_type {
            SocketCommand::StartPre => self.Socket.ExecStartPre.clone(),
            SocketCommand::StartPost => self.Socket.ExecStartPost.clone(),
            SocketCommand::StopPre => self.Socket.ExecStopPre.clone(),
            SocketCommand::StopPost => self.Socket.ExecStopPost.clone(),
        }
    }
}

/// one configured endpoint: either a socket address (`sa`) or a filesystem
/// path (fifo/special/mqueue). Exactly one of the two is populated,
/// matching `p_type`.
pub(super) struct SocketPortConf {
    p_type: PortType,
    sa: Option<SocketAddress>,
    path: Option<PathBuf>,
    listen: String,
}

impl SocketPortConf {
    pub(super) fn new_socket(sa: SocketAddress, listenr: &str) -> SocketPortConf {
        SocketPortConf {
            p_type: PortType::Socket,
            sa: Some(sa),
            path: None,
            listen: listenr.to_string(),
        }
    }

    pub(super) fn new_path(p_type: PortType, listenr: &str) -> SocketPortConf {
        SocketPortConf {
            p_type,
            sa: None,
            path: Some(PathBuf::from(listenr)),
            listen: listenr.to_string(),
        }
    }

    pub(super) fn p_type(&self) -> PortType {
        self.p_type
    }

    pub(super) fn sa(&self) -> Option<&SocketAddress> {
        self.sa.as_ref()
    }

    pub(super) fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub(super) fn listen(&self) -> &str {
        &self.listen
    }
}

pub(super) struct SocketAddress {
    sock_addr: Box<dyn SockaddrLike>,
    sa_type: SockType,
    netlink_protocol: Option<libc::c_int>,
}

impl SocketAddress {
    pub(super) fn new(sock_addr: Box<dyn SockaddrLike>, sa_type: SockType) -> SocketAddress {
        SocketAddress {
            sock_addr,
            sa_type,
            netlink_protocol: None,
        }
    }

    pub(super) fn new_netlink(addr: NetlinkAddr, protocol: libc::c_int) -> SocketAddress {
        SocketAddress {
            sock_addr: Box::new(addr),
            sa_type: SockType::Raw,
            netlink_protocol: Some(protocol),
        }
    }

    pub(super) fn can_accept(&self) -> bool {
        matches!(self.sa_type, SockType::Stream | SockType::SeqPacket)
    }

    pub(super) fn is_netlink(&self) -> bool {
        self.netlink_protocol.is_some()
    }

    pub(super) fn netlink_protocol(&self) -> Option<libc::c_int> {
        self.netlink_protocol
    }

    pub(super) fn sa_type(&self) -> SockType {
        self.sa_type
    }

    pub(super) fn sock_addr(&self) -> &dyn SockaddrLike {
        &*self.sock_addr
    }

    pub(super) fn path(&self) -> Option<PathBuf> {
        if self.sock_addr.family() != Some(AddressFamily::Unix) {
            return None;
        }
        if let Some(unix_addr) =
            unsafe { UnixAddr::from_raw(self.sock_addr.as_ptr(), Some(self.sock_addr.len())) }
        {
            return unix_addr.path().map(|p| p.to_path_buf());
        }
        None
    }

    pub(super) fn family(&self) -> Option<AddressFamily> {
        self.sock_addr.family()
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "sock type: {:?}, sock family: {:?}",
            self.sa_type,
            self.sock_addr.family(),
        )
    }
}

fn parse_netlink_address(item: &str) -> Result<SocketAddress> {
    let words: Vec<&str> = item.split_whitespace().collect();
    if words.len() != 2 {
        return Err(format!("Netlink configuration format is not correct: {item}").into());
    }

    let family = NetlinkProtocol::from(words[0].to_string());
    if family == NetlinkProtocol::NetlinkInvalid {
        return Err("Netlink family is invalid".to_string().into());
    }

    let group = words[1]
        .parse::<u32>()
        .map_err(|_| Error::from("Netlink group is invalid".to_string()))?;

    Ok(SocketAddress::new_netlink(
        NetlinkAddr::new(0, group),
        family.as_raw(),
    ))
}

fn parse_socket_address(item: &str, socket_type: SockType) -> Result<SocketAddress> {
    if item.starts_with('/') {
        let unix_addr = UnixAddr::new(&PathBuf::from(item)).context(Nix)?;
        return Ok(SocketAddress::new(Box::new(unix_addr), socket_type));
    }

    if item.starts_with('@') {
        let unix_addr = UnixAddr::new_abstract(item.as_bytes()).context(Nix)?;
        return Ok(SocketAddress::new(Box::new(unix_addr), socket_type));
    }

    if let Ok(port) = item.parse::<u16>() {
        if port == 0 {
            return Err("invalid port number".to_string().into());
        }

        if socket_util::ipv6_is_supported() {
            let addr = SockaddrIn6::from(SocketAddrV6::new(
                Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0),
                port,
                0,
                0,
            ));
            return Ok(SocketAddress::new(Box::new(addr), socket_type));
        }

        let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), port));
        return Ok(SocketAddress::new(Box::new(addr), socket_type));
    }

    if let Ok(socket_addr) = item.parse::<SocketAddr>() {
        let sock_addr: Box<dyn SockaddrLike> = match socket_addr {
            SocketAddr::V4(addr) => Box::new(SockaddrIn::from(addr)),
            SocketAddr::V6(addr) => Box::new(SockaddrIn6::from(addr)),
        };
        return Ok(SocketAddress::new(sock_addr, socket_type));
    }

    Err("invalid listening config".to_string().into())
}

#[cfg(test)]
mod tests {
    use crate::comm::SocketUnitComm;
    use crate::config::SocketConfig;
    use std::path::PathBuf;
    use std::rc::Rc;

    #[test]
    fn test_socket_parse() {
        let mut file_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        file_path.push("tests/test_units/test.socket.toml");
        let paths = vec![file_path];

        let comm = Rc::new(SocketUnitComm::new());
        let config = SocketConfig::new(&comm);
        let result = config.load(paths);

        assert!(result.is_ok());
        assert_eq!(config.ports().len(), 1);
    }
}
