// 认证令牌访问
//
// 只负责在请求时取出 Bearer 令牌，令牌的获取（登录）不在本模块范围内

use std::fmt;

/// 默认读取令牌的环境变量
pub const DEFAULT_TOKEN_ENV: &str = "LECTURE_UPLOADER_TOKEN";

/// Bearer 令牌提供者
///
/// 每次请求调用一次，返回 None 时请求不携带 Authorization 头
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// 固定令牌
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// 每次请求时从环境变量读取令牌
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV)
    }
}

impl TokenProvider for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}
