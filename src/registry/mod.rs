//! 服务注册模块
//!
//! 负责注册载荷的校验以及按 TTL 周期续期，续期循环随注销或客户端关闭一起停止。

pub mod registration;
pub mod renewal;

pub use registration::Registration;
pub use renewal::{RegistrationManager, RegistrationStatus};
