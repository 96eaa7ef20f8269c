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

//! small constants and lookups shared across the socket unit's submodules.

pub(crate) const PLUGIN_NAME: &str = "SocketUnit";

/// `ListenNetlink=` carries a family name and a multicast group number;
/// this maps the family name to the kernel's `NETLINK_*` protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NetlinkProtocol {
    NetlinkRoute,
    NetlinkKobjectUevent,
    NetlinkAudit,
    NetlinkInvalid,
}

impl From<String> for NetlinkProtocol {
    fn from(s: String) -> Self {
        match s.as_str() {
            "route" => NetlinkProtocol::NetlinkRoute,
            "kobject-uevent" => NetlinkProtocol::NetlinkKobjectUevent,
            "audit" => NetlinkProtocol::NetlinkAudit,
            _ => NetlinkProtocol::NetlinkInvalid,
        }
    }
}

impl NetlinkProtocol {
    /// the raw `NETLINK_*` protocol number `socket(2)` expects.
    pub(crate) fn as_raw(self) -> libc::c_int {
        match self {
            NetlinkProtocol::NetlinkRoute => libc::NETLINK_ROUTE,
            NetlinkProtocol::NetlinkKobjectUevent => libc::NETLINK_KOBJECT_UEVENT,
            NetlinkProtocol::NetlinkAudit => libc::NETLINK_AUDIT,
            NetlinkProtocol::NetlinkInvalid => -1,
        }
    }
}
