//! 缓存头部操作模块
//!
//! 这个模块提供缓存头部的读取、验证、写入，以及主机列表校验。

mod read;
mod write;
pub mod checksum;

pub use read::*;
pub use write::*;

use crate::{
    consts::MAX_HOSTS,
    error::{Error, ErrorKind, Result},
    types::CacheHeader,
};
use alloc::vec::Vec;
use core::net::Ipv4Addr;

/// 解析点分十进制主机地址列表
///
/// # 错误
///
/// 地址无法解析或数量超过 [`MAX_HOSTS`] 时返回 `Config`
pub fn parse_hosts(hosts: &[&str]) -> Result<Vec<Ipv4Addr>> {
    if hosts.len() > MAX_HOSTS {
        return Err(Error::new(ErrorKind::Config, "Too many hosts"));
    }
    hosts
        .iter()
        .map(|h| {
            h.trim().parse::<Ipv4Addr>().map_err(|_| {
                log::error!("[HEADER] invalid host address [{}]", h);
                Error::new(ErrorKind::Config, "Invalid host address")
            })
        })
        .collect()
}

impl CacheHeader {
    /// 校验请求的主机列表与头部记录是否一致（数量和每个地址）
    ///
    /// # 错误
    ///
    /// 不一致时返回 `Config`：设备是为另一组主机格式化的
    pub fn matches_hosts(&self, hosts: &[Ipv4Addr]) -> Result<()> {
        let recorded = self.configured_hosts();

        for (i, host) in hosts.iter().enumerate() {
            match recorded.get(i) {
                Some(expected) if expected == host => {
                    log::info!("[HEADER] host # {} :: {}", i + 1, host);
                }
                Some(expected) => {
                    log::error!(
                        "[HEADER] host # {} MISMATCH :: requested [{}] header says [{}]",
                        i + 1,
                        host,
                        expected
                    );
                    return Err(Error::new(ErrorKind::Config, "Host address mismatch"));
                }
                None => break,
            }
        }

        if hosts.len() != self.host_count as usize {
            log::error!(
                "[HEADER] host count is wrong, header specifies {} hosts, requested {}",
                self.host_count,
                hosts.len()
            );
            return Err(Error::new(ErrorKind::Config, "Host count mismatch"));
        }
        Ok(())
    }
}
