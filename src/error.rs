//! 错误类型定义
//!
//! 提供缓存引擎各操作的错误类型。I/O 错误附带发生位置（偏移、长度、系统错误码）。

use core::fmt;

/// 缓存操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
    io: Option<IoContext>,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 底层设备读写失败
    Io,
    /// 无效参数
    InvalidInput,
    /// 魔数不匹配：设备未格式化或不是缓存设备
    Format,
    /// 主机列表与头部记录不一致
    Config,
    /// 没有空闲槽位
    CacheFull,
    /// 块不在缓存中
    NotCached,
    /// 主机编号超出配置范围
    InvalidHost,
    /// 元数据损坏
    Corrupted,
    /// 当前生命周期状态下不允许该操作
    InvalidState,
}

/// I/O 错误的上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoContext {
    /// 设备字节偏移
    pub offset: u64,
    /// 请求长度（字节）
    pub len: usize,
    /// 操作系统错误码（如果有）
    pub os_code: Option<i32>,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message,
            io: None,
        }
    }

    /// 创建带位置信息的 I/O 错误
    pub const fn io(message: &'static str, offset: u64, len: usize) -> Self {
        Self {
            kind: ErrorKind::Io,
            message,
            io: Some(IoContext {
                offset,
                len,
                os_code: None,
            }),
        }
    }

    /// 附加位置信息
    ///
    /// 已有的系统错误码会被保留。
    pub fn at(mut self, offset: u64, len: usize) -> Self {
        let os_code = self.io.and_then(|ctx| ctx.os_code);
        self.io = Some(IoContext {
            offset,
            len,
            os_code,
        });
        self
    }

    /// 附加系统错误码
    pub fn with_os_code(mut self, code: Option<i32>) -> Self {
        let mut ctx = self.io.unwrap_or(IoContext {
            offset: 0,
            len: 0,
            os_code: None,
        });
        ctx.os_code = code;
        self.io = Some(ctx);
        self
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// 获取 I/O 上下文
    pub const fn io_context(&self) -> Option<IoContext> {
        self.io
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(ctx) = &self.io {
            write!(f, " (offset={:#x}, len={}", ctx.offset, ctx.len)?;
            if let Some(code) = ctx.os_code {
                write!(f, ", os error {}", code)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, "Device I/O failed").with_os_code(err.raw_os_error())
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
