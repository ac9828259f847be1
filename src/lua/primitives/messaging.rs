//! Peer messaging primitive for Lua scripts.
//!
//! # Usage in Lua
//!
//! ```lua
//! local cmd = messaging.encode("SET", "user:" .. id, name)
//! if not messaging.remote_send("10.0.0.7", 6390, cmd) then
//!     log.warn("peer down")
//! end
//! local key = messaging.hash("user:", id)   -- 40 hex chars
//! ```
//!
//! `remote_send` writes `msg` verbatim, so it is normally the output of
//! `encode`. Delivery is fire-and-forget: `true` means the bytes were
//! written, not that the peer ran them.
//!
//! Arguments to `encode` and `hash` may be strings or numbers. Numbers are
//! truncated toward zero and rendered in decimal; `nil` renders as an empty
//! string.

use anyhow::{anyhow, Result};
use mlua::{Lua, Value, Variadic};
use sha1::{Digest, Sha1};

use crate::protocol::{encode_command, CommandBuffer};
use crate::transport::{send_command, RemoteAddr};

const REMOTE_SEND_USAGE: &str = "messaging.remote_send(host, port, msg)";
const ENCODE_USAGE: &str = "messaging.encode() takes 1+ string or number args";
const HASH_USAGE: &str = "messaging.hash() takes 1+ string or number args";

/// Hex SHA-1 of the arguments concatenated with no separator.
pub fn content_hash<A: AsRef<[u8]>>(parts: &[A]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Render one scalar argument, or `None` for tables, functions, etc.
fn render_arg(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Nil => Some(Vec::new()),
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Integer(n) => Some(n.to_string().into_bytes()),
        Value::Number(n) => Some((n.trunc() as i64).to_string().into_bytes()),
        _ => None,
    }
}

/// Render a non-empty argument list, or fail with `usage`.
fn render_args(args: &[Value], usage: &'static str) -> mlua::Result<Vec<Vec<u8>>> {
    if args.is_empty() {
        return Err(mlua::Error::runtime(usage));
    }
    args.iter()
        .map(|v| render_arg(v).ok_or_else(|| mlua::Error::runtime(usage)))
        .collect()
}

fn parse_port(value: &Value) -> Option<u16> {
    match value {
        Value::Integer(n) => u16::try_from(*n).ok(),
        Value::Number(n) => u16::try_from(n.trunc() as i64).ok(),
        Value::String(s) => s.to_str().ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn remote_send(args: &[Value]) -> mlua::Result<bool> {
    let usage = || mlua::Error::runtime(REMOTE_SEND_USAGE);
    let [host, port, msg] = args else {
        return Err(usage());
    };
    let Value::String(host) = host else {
        return Err(usage());
    };
    let host = host.to_str().map_err(|_| usage())?.to_string();
    let port = parse_port(port).ok_or_else(usage)?;
    let Value::String(msg) = msg else {
        return Err(usage());
    };

    let addr = RemoteAddr::new(host, port);
    let buffer = CommandBuffer::from_encoded(msg.as_bytes().to_vec());
    match send_command(&addr, buffer, false) {
        Ok(stream) => {
            drop(stream);
            Ok(true)
        }
        Err(e) => {
            log::debug!("[Lua] remote_send to {addr} failed: {e}");
            Ok(false)
        }
    }
}

/// Register the `messaging` table.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let messaging = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create messaging table: {e}"))?;

    // messaging.remote_send(host, port, msg) -> bool
    let remote_send_fn = lua
        .create_function(|_, args: Variadic<Value>| remote_send(&args))
        .map_err(|e| anyhow!("Failed to create messaging.remote_send function: {e}"))?;
    messaging
        .set("remote_send", remote_send_fn)
        .map_err(|e| anyhow!("Failed to set messaging.remote_send: {e}"))?;

    // messaging.encode(...) -> string
    let encode_fn = lua
        .create_function(|lua, args: Variadic<Value>| {
            let rendered = render_args(&args, ENCODE_USAGE)?;
            lua.create_string(encode_command(&rendered))
        })
        .map_err(|e| anyhow!("Failed to create messaging.encode function: {e}"))?;
    messaging
        .set("encode", encode_fn)
        .map_err(|e| anyhow!("Failed to set messaging.encode: {e}"))?;

    // messaging.hash(...) -> string
    let hash_fn = lua
        .create_function(|_, args: Variadic<Value>| {
            let rendered = render_args(&args, HASH_USAGE)?;
            Ok(content_hash(&rendered))
        })
        .map_err(|e| anyhow!("Failed to create messaging.hash function: {e}"))?;
    messaging
        .set("hash", hash_fn)
        .map_err(|e| anyhow!("Failed to set messaging.hash: {e}"))?;

    lua.globals()
        .set("messaging", messaging)
        .map_err(|e| anyhow!("Failed to register messaging table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestParser;
    use std::io::Read;
    use std::net::TcpListener;

    fn lua() -> Lua {
        let lua = Lua::new();
        register(&lua).expect("Should register messaging primitives");
        lua
    }

    fn eval_bytes(lua: &Lua, src: &str) -> Vec<u8> {
        let s: mlua::String = lua.load(src).eval().unwrap();
        s.as_bytes().to_vec()
    }

    fn eval_err(lua: &Lua, src: &str) -> String {
        lua.load(src).exec().unwrap_err().to_string()
    }

    #[test]
    fn test_encode_parses_back_to_same_args() {
        let lua = lua();
        let encoded = eval_bytes(&lua, r#"return messaging.encode("SET", "k", "v")"#);
        assert_eq!(encoded, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");

        let mut parser = RequestParser::new();
        parser.feed(&encoded);
        let cmd = parser.next_command().unwrap().unwrap();
        assert_eq!(cmd.args(), [b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert!(parser.next_command().unwrap().is_none());
    }

    #[test]
    fn test_encode_renders_numbers_and_nil() {
        let lua = lua();
        let encoded = eval_bytes(&lua, r#"return messaging.encode("X", 42, 3.9, -2.7, nil)"#);
        assert_eq!(encoded, encode_command(&["X", "42", "3", "-2", ""]));
    }

    #[test]
    fn test_encode_keeps_binary_strings() {
        let lua = lua();
        let encoded = eval_bytes(&lua, r#"return messaging.encode("a\0b")"#);
        assert_eq!(encoded, b"*1\r\n$3\r\na\0b\r\n");
    }

    #[test]
    fn test_encode_argument_errors() {
        let lua = lua();
        assert!(eval_err(&lua, "messaging.encode()").contains(ENCODE_USAGE));
        assert!(eval_err(&lua, "messaging.encode('a', {})").contains(ENCODE_USAGE));
    }

    #[test]
    fn test_hash_concatenates_without_separator() {
        let lua = lua();
        let split: String = lua.load(r#"return messaging.hash("a", "b")"#).eval().unwrap();
        let joined: String = lua.load(r#"return messaging.hash("ab")"#).eval().unwrap();
        assert_eq!(split, joined);
        assert_eq!(split.len(), 40);
        assert!(split.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let numeric: String = lua.load("return messaging.hash(1, 2.5)").eval().unwrap();
        assert_eq!(numeric, content_hash(&["12"]));
    }

    #[test]
    fn test_hash_known_digest() {
        assert_eq!(
            content_hash(&["abc"]),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_hash_argument_errors() {
        let lua = lua();
        assert!(eval_err(&lua, "messaging.hash()").contains(HASH_USAGE));
        assert!(eval_err(&lua, "messaging.hash(true)").contains(HASH_USAGE));
    }

    #[test]
    fn test_remote_send_argument_errors() {
        let lua = lua();
        for src in [
            "messaging.remote_send()",
            "messaging.remote_send('h', 1)",
            "messaging.remote_send(1, 1, 'm')",
            "messaging.remote_send('h', {}, 'm')",
            "messaging.remote_send('h', 'abc', 'm')",
            "messaging.remote_send('h', 70000, 'm')",
            "messaging.remote_send('h', 1, 5)",
        ] {
            assert!(eval_err(&lua, src).contains(REMOTE_SEND_USAGE), "{src}");
        }
    }

    #[test]
    fn test_remote_send_unreachable_returns_false() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let lua = lua();
        lua.globals().set("port", port).unwrap();
        let sent: bool = lua
            .load(r#"return messaging.remote_send("127.0.0.1", port, "x")"#)
            .eval()
            .unwrap();
        assert!(!sent);
    }

    #[test]
    fn test_remote_send_writes_message_verbatim() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let lua = lua();
        lua.globals().set("port", port.to_string()).unwrap();
        let sent: bool = lua
            .load(r#"return messaging.remote_send("127.0.0.1", port, messaging.encode("PING"))"#)
            .eval()
            .unwrap();
        assert!(sent);

        let (mut conn, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        conn.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"*1\r\n$4\r\nPING\r\n");
    }
}
