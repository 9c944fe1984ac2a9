//! Protobuf messages exchanged with a node.
//!
//! Both transports share these types: the streaming transport frames them as
//! gRPC messages, the REST transport sends the raw protobuf encoding as the
//! HTTP body.

use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

/// Proxy engine hosted by the node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum BackendType {
    Xray = 0,
}

impl BackendType {
    /// Name used in the protobuf definition
    pub fn as_str_name(&self) -> &'static str {
        match self {
            BackendType::Xray => "XRAY",
        }
    }
}

/// Selector for the `GetStats` family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatType {
    Outbounds = 0,
    Outbound = 1,
    Inbounds = 2,
    Inbound = 3,
    UsersStat = 4,
    UserStat = 5,
}

impl StatType {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            StatType::Outbounds => "Outbounds",
            StatType::Outbound => "Outbound",
            StatType::Inbounds => "Inbounds",
            StatType::Inbound => "Inbound",
            StatType::UsersStat => "UsersStat",
            StatType::UserStat => "UserStat",
        }
    }
}

/// Node identity returned by `Start` and `GetBaseInfo`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BaseInfoResponse {
    #[prost(bool, tag = "1")]
    pub started: bool,
    #[prost(string, tag = "2")]
    pub core_version: String,
    #[prost(string, tag = "3")]
    pub node_version: String,
    /// Session token issued by the REST transport, empty otherwise
    #[prost(string, tag = "4")]
    pub session_id: String,
}

/// Session-start request: backend configuration plus the initial user set
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Backend {
    #[prost(enumeration = "BackendType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub config: String,
    #[prost(message, repeated, tag = "3")]
    pub users: Vec<User>,
    #[prost(uint64, tag = "4")]
    pub keep_alive: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Log {
    #[prost(string, tag = "1")]
    pub detail: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stat {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub r#type: String,
    #[prost(string, tag = "3")]
    pub link: String,
    #[prost(int64, tag = "4")]
    pub value: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatResponse {
    #[prost(message, repeated, tag = "1")]
    pub stats: Vec<Stat>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub reset: bool,
    #[prost(enumeration = "StatType", tag = "3")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OnlineStatResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub value: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatsOnlineIpListResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(map = "string, int64", tag = "2")]
    pub ips: HashMap<String, i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackendStatsResponse {
    #[prost(uint32, tag = "1")]
    pub num_goroutine: u32,
    #[prost(uint32, tag = "2")]
    pub num_gc: u32,
    #[prost(uint64, tag = "3")]
    pub alloc: u64,
    #[prost(uint64, tag = "4")]
    pub total_alloc: u64,
    #[prost(uint64, tag = "5")]
    pub sys: u64,
    #[prost(uint64, tag = "6")]
    pub mallocs: u64,
    #[prost(uint64, tag = "7")]
    pub frees: u64,
    #[prost(uint64, tag = "8")]
    pub live_objects: u64,
    #[prost(uint64, tag = "9")]
    pub pause_total_ns: u64,
    #[prost(uint32, tag = "10")]
    pub uptime: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemStatsResponse {
    #[prost(uint64, tag = "1")]
    pub mem_total: u64,
    #[prost(uint64, tag = "2")]
    pub mem_used: u64,
    #[prost(uint64, tag = "3")]
    pub cpu_cores: u64,
    #[prost(double, tag = "4")]
    pub cpu_usage: f64,
    #[prost(uint64, tag = "5")]
    pub incoming_bandwidth_speed: u64,
    #[prost(uint64, tag = "6")]
    pub outgoing_bandwidth_speed: u64,
}

// ═══════════════════════════════════════════════════════════════════════
// User aggregate
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vmess {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vless {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub flow: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trojan {
    #[prost(string, tag = "1")]
    pub password: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Shadowsocks {
    #[prost(string, tag = "1")]
    pub password: String,
    #[prost(string, tag = "2")]
    pub method: String,
}

/// Up to four proxy-protocol credential records for one user
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Proxy {
    #[prost(message, optional, tag = "1")]
    pub vmess: Option<Vmess>,
    #[prost(message, optional, tag = "2")]
    pub vless: Option<Vless>,
    #[prost(message, optional, tag = "3")]
    pub trojan: Option<Trojan>,
    #[prost(message, optional, tag = "4")]
    pub shadowsocks: Option<Shadowsocks>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    #[prost(string, tag = "1")]
    pub email: String,
    #[prost(message, optional, tag = "2")]
    pub proxies: Option<Proxy>,
    #[prost(string, repeated, tag = "3")]
    pub inbounds: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Users {
    #[prost(message, repeated, tag = "1")]
    pub users: Vec<User>,
}
