//! 块设备抽象
//!
//! 提供原始设备接口和按字节偏移的定位 I/O。
//! block/device.rs 定义设备 trait 和 `BlockDev` 包装器（字节读写、统计计数）
//! block/mem.rs 提供内存设备，block/file.rs 提供基于文件的设备（`std` 特性）

mod device;
mod mem;
#[cfg(feature = "std")]
mod file;

pub use device::{BlockDevice, BlockDev};
pub use mem::MemDevice;
#[cfg(feature = "std")]
pub use file::FileDevice;
