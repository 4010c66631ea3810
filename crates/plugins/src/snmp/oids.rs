//! 常用OID表
//!
//! 全部为编译期常量，进程内没有可变的全局状态。
//! 表型OID（接口、存储）为列前缀，使用时需追加实例索引。

pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
pub const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
pub const SYS_CONTACT: &str = "1.3.6.1.2.1.1.4.0";
pub const SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
pub const SYS_LOCATION: &str = "1.3.6.1.2.1.1.6.0";

pub const IF_NUMBER: &str = "1.3.6.1.2.1.2.1.0";
pub const IF_IN_OCTETS: &str = "1.3.6.1.2.1.2.2.1.10";
pub const IF_IN_UCAST_PKTS: &str = "1.3.6.1.2.1.2.2.1.11";
pub const IF_OUT_OCTETS: &str = "1.3.6.1.2.1.2.2.1.16";
pub const IF_OUT_UCAST_PKTS: &str = "1.3.6.1.2.1.2.2.1.17";

pub const HR_PROCESSOR_LOAD: &str = "1.3.6.1.2.1.25.3.3.1.2";
pub const HR_STORAGE_ALLOCATION_UNITS: &str = "1.3.6.1.2.1.25.2.3.1.4";
pub const HR_STORAGE_SIZE: &str = "1.3.6.1.2.1.25.2.3.1.5";
pub const HR_STORAGE_USED: &str = "1.3.6.1.2.1.25.2.3.1.6";

pub const UCD_MEM_TOTAL_REAL: &str = "1.3.6.1.4.1.2021.4.5.0";
pub const UCD_MEM_AVAIL_REAL: &str = "1.3.6.1.4.1.2021.4.6.0";
pub const UCD_CPU_IDLE: &str = "1.3.6.1.4.1.2021.11.9.0";

pub const CISCO_CPU_BUSY: &str = "1.3.6.1.4.1.9.2.1.56.0";

/// 系统信息组，GET即可，无需实例索引
pub const SYSTEM_OIDS: &[(&str, &str)] = &[
    ("sysDescr", SYS_DESCR),
    ("sysUpTime", SYS_UPTIME),
    ("sysContact", SYS_CONTACT),
    ("sysName", SYS_NAME),
    ("sysLocation", SYS_LOCATION),
];

/// 接口计数器列前缀，追加接口索引后GET
pub const INTERFACE_COLUMN_OIDS: &[(&str, &str)] = &[
    ("ifInOctets", IF_IN_OCTETS),
    ("ifOutOctets", IF_OUT_OCTETS),
    ("ifInUcastPkts", IF_IN_UCAST_PKTS),
    ("ifOutUcastPkts", IF_OUT_UCAST_PKTS),
];
