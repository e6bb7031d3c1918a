//! 测试套件模块

pub mod inapp;
pub mod retry;
