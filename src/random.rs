//! 安全随机数生成模块
//!
//! 提供密码学安全的随机数生成功能，用于生成一次性密码、访问码、
//! nonce 和各类标识符。

use rand::{Rng, TryRngCore, rngs::OsRng};

use crate::error::{Error, Result};

/// 一次性密码的随机字节数（base64url 编码后为 24 个字符）
pub const PASSWORD_BYTES: usize = 18;

/// 生成指定长度的随机字节数组
///
/// 使用操作系统提供的密码学安全随机数生成器 (CSPRNG)
///
/// # Example
///
/// ```rust
/// use passrs::random::generate_random_bytes;
///
/// let bytes = generate_random_bytes(32).unwrap();
/// assert_eq!(bytes.len(), 32);
/// ```
pub fn generate_random_bytes(length: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::store_unavailable(format!("rng failed: {:?}", e)))?;
    Ok(bytes)
}

/// 生成指定字节数的十六进制随机字符串
///
/// 最终字符串长度为字节数的两倍。
pub fn generate_random_hex(byte_length: usize) -> Result<String> {
    let bytes = generate_random_bytes(byte_length)?;
    Ok(hex_encode(&bytes))
}

/// 生成指定字节数的 Base64 URL 安全随机字符串
///
/// 使用 URL 安全的 Base64 编码（不含填充），可直接用于 URL 参数。
pub fn generate_random_base64_url(byte_length: usize) -> Result<String> {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    let bytes = generate_random_bytes(byte_length)?;
    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// 生成一次性明文密码
///
/// 固定长度（24 字符）、URL 安全字母表。
///
/// # Example
///
/// ```rust
/// use passrs::random::generate_password;
///
/// let password = generate_password().unwrap();
/// assert_eq!(password.len(), 24);
/// assert!(!password.contains('+'));
/// assert!(!password.contains('/'));
/// ```
pub fn generate_password() -> Result<String> {
    generate_random_base64_url(PASSWORD_BYTES)
}

/// 生成凭证 ID
///
/// 32 字符十六进制，创建后不可变。
pub fn generate_credential_id() -> Result<String> {
    generate_random_hex(16)
}

/// 生成会话 ID
pub fn generate_session_id() -> Result<String> {
    generate_random_hex(16)
}

/// 生成派生 nonce
///
/// 32 字符十六进制。每次轮换使用新 nonce，使旧的验证哈希永远无法
/// 再匹配新派生出的值。
pub fn generate_nonce() -> Result<String> {
    generate_random_hex(16)
}

/// 生成一次性访问码
///
/// 使用排除了易混淆字符（0、O、I、l、1）的字母表，便于人工抄写。
///
/// # Example
///
/// ```rust
/// use passrs::random::generate_access_code;
///
/// let code = generate_access_code(8).unwrap();
/// assert_eq!(code.len(), 8);
/// ```
pub fn generate_access_code(length: usize) -> Result<String> {
    // 使用的字符集（排除容易混淆的字符如 0, O, I, l, 1）
    const CHARSET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

    let mut code = String::with_capacity(length);
    for _ in 0..length {
        let idx = rand::rng().random_range(0..CHARSET.len());
        code.push(CHARSET[idx] as char);
    }
    Ok(code)
}

// ============================================================================
// 辅助函数
// ============================================================================

/// 将字节数组编码为十六进制字符串
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 常量时间比较两个字节切片
///
/// 用于防止时序攻击
///
/// # Example
///
/// ```rust
/// use passrs::random::constant_time_compare;
///
/// assert!(constant_time_compare(b"secret_token", b"secret_token"));
/// assert!(!constant_time_compare(b"secret_token", b"other_token!"));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// 常量时间比较两个字符串
pub fn constant_time_compare_str(a: &str, b: &str) -> bool {
    constant_time_compare(a.as_bytes(), b.as_bytes())
}
