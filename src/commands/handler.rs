//! Command Execution
//!
//! The single entry point from the protocol layer. For every parsed
//! command the handler:
//!
//! 1. validates the verb, arity, and arguments; anything malformed is
//!    rejected here, before the WAL sees it;
//! 2. for mutating verbs (`SET`, `DEL`, `EXPIRE`, `FLUSHDB`), builds a
//!    WAL record carrying the *absolute* expiry deadline and appends it;
//! 3. only after the append succeeds, applies the mutation to the store;
//! 4. frames the reply.
//!
//! The append-before-mutate order is the durability contract: every
//! state change a client can observe is already in the WAL. It follows
//! that a failed append must fail the whole command, since swallowing the
//! error and mutating anyway would hand out acknowledgements the log
//! cannot replay.
//!
//! Read-only verbs (`GET`, `TTL`, `PING`) never touch the WAL.

use crate::persistence::{WalRecord, WalWriter};
use crate::protocol::RespValue;
use crate::storage::{unix_now, Store, Ttl};
use bytes::Bytes;
use std::sync::Arc;
use tracing::error;

/// Executes parsed commands against the store and the WAL.
#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
    wal: Arc<WalWriter>,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>, wal: Arc<WalWriter>) -> Self {
        Self { store, wal }
    }

    /// Executes one command and returns its reply.
    ///
    /// `command` is the value the protocol layer parsed: an array whose
    /// first element is the verb. Every outcome, including failure, is
    /// expressed as a `RespValue` ready for the wire.
    pub fn execute(&self, command: RespValue) -> RespValue {
        let args = match command {
            RespValue::Array(args) => args,
            _ => return RespValue::error("ERR expected a command array"),
        };
        let Some((verb, params)) = args.split_first() else {
            return RespValue::error("ERR empty command");
        };
        let Some(verb) = verb.as_str() else {
            return RespValue::error("ERR invalid command name");
        };

        match verb.to_ascii_uppercase().as_str() {
            "PING" => self.cmd_ping(params),
            "GET" => self.cmd_get(params),
            "SET" => self.cmd_set(params),
            "DEL" => self.cmd_del(params),
            "EXPIRE" => self.cmd_expire(params),
            "TTL" => self.cmd_ttl(params),
            "FLUSHDB" => self.cmd_flushdb(params),
            other => RespValue::error(format!("ERR unknown command '{}'", other)),
        }
    }

    /// Appends a WAL record, mapping failure to the reply that aborts
    /// the command. No shard mutation may precede this call.
    fn log(&self, record: WalRecord) -> Result<(), RespValue> {
        self.wal.append(record).map_err(|e| {
            error!(error = %e, "WAL append failed; command rejected");
            RespValue::error(format!("ERR wal append failed: {}", e))
        })
    }

    /// PING
    fn cmd_ping(&self, params: &[RespValue]) -> RespValue {
        if !params.is_empty() {
            return arity_error("PING");
        }
        RespValue::pong()
    }

    /// GET key
    fn cmd_get(&self, params: &[RespValue]) -> RespValue {
        let [key] = params else {
            return arity_error("GET");
        };
        let Some(key) = param_key(key) else {
            return RespValue::error("ERR invalid key");
        };

        // Values are opaque bytes; the reply frame carries them untouched
        match self.store.get(key) {
            Some(value) => RespValue::simple_bytes(value),
            None => RespValue::simple_string("(nil)"),
        }
    }

    /// SET key value [EX seconds]
    fn cmd_set(&self, params: &[RespValue]) -> RespValue {
        if params.len() < 2 || params.len() > 4 {
            return arity_error("SET");
        }
        let Some(key) = param_key(&params[0]) else {
            return RespValue::error("ERR invalid key");
        };
        let Some(value) = param_bytes(&params[1]) else {
            return RespValue::error("ERR invalid value");
        };

        // The deadline is computed here, once, and logged as an absolute
        // instant; replaying the record later must not restart the TTL
        let expire_at = match &params[2..] {
            [] => 0,
            [opt, seconds] if is_ex_option(opt) => {
                match param_i64(seconds) {
                    Some(s) if s > 0 => unix_now() + s as u64,
                    _ => return RespValue::error("ERR invalid expire time in 'SET'"),
                }
            }
            _ => return RespValue::error("ERR syntax error"),
        };

        if let Err(reply) = self.log(WalRecord::set(key.to_string(), value.clone(), expire_at)) {
            return reply;
        }
        self.store.set(key.to_string(), value, expire_at);
        RespValue::ok()
    }

    /// DEL key
    fn cmd_del(&self, params: &[RespValue]) -> RespValue {
        let [key] = params else {
            return arity_error("DEL");
        };
        let Some(key) = param_key(key) else {
            return RespValue::error("ERR invalid key");
        };

        // Logged unconditionally; the reply reports what was removed
        if let Err(reply) = self.log(WalRecord::del(key.to_string())) {
            return reply;
        }
        let removed = self.store.del(key);
        RespValue::integer(removed as i64)
    }

    /// EXPIRE key seconds
    fn cmd_expire(&self, params: &[RespValue]) -> RespValue {
        let [key, seconds] = params else {
            return arity_error("EXPIRE");
        };
        let Some(key) = param_key(key) else {
            return RespValue::error("ERR invalid key");
        };
        let Some(seconds) = param_i64(seconds) else {
            return RespValue::error("ERR invalid expire time in 'EXPIRE'");
        };

        // Negative seconds put the deadline in the past, which expires
        // the key immediately; clamp keeps the sentinel 0 meaning "never"
        let expire_at = (unix_now() as i64).saturating_add(seconds).max(1) as u64;

        // Logged even when the key turns out to be absent; replay makes
        // the same present-or-not decision from the record timestamp
        if let Err(reply) = self.log(WalRecord::expire(key.to_string(), expire_at)) {
            return reply;
        }
        let updated = self.store.expire(key, expire_at);
        RespValue::integer(updated as i64)
    }

    /// TTL key
    fn cmd_ttl(&self, params: &[RespValue]) -> RespValue {
        let [key] = params else {
            return arity_error("TTL");
        };
        let Some(key) = param_key(key) else {
            return RespValue::error("ERR invalid key");
        };

        match self.store.ttl(key) {
            Ttl::Missing => RespValue::integer(-2),
            Ttl::NoExpiry => RespValue::integer(-1),
            Ttl::Seconds(s) => RespValue::integer(s),
        }
    }

    /// FLUSHDB
    fn cmd_flushdb(&self, params: &[RespValue]) -> RespValue {
        if !params.is_empty() {
            return arity_error("FLUSHDB");
        }

        if let Err(reply) = self.log(WalRecord::flush_db()) {
            return reply;
        }
        self.store.flush();
        RespValue::ok()
    }
}

fn arity_error(verb: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        verb
    ))
}

/// A key parameter: UTF-8 text, at least one byte.
fn param_key(value: &RespValue) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

fn param_bytes(value: &RespValue) -> Option<Bytes> {
    match value {
        RespValue::BulkString(b) => Some(b.clone()),
        RespValue::SimpleString(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
        _ => None,
    }
}

fn param_i64(value: &RespValue) -> Option<i64> {
    match value {
        RespValue::Integer(n) => Some(*n),
        other => other.as_str()?.parse().ok(),
    }
}

fn is_ex_option(value: &RespValue) -> bool {
    value
        .as_str()
        .map(|s| s.eq_ignore_ascii_case("EX"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{read_records, WalCommand};
    use tempfile::TempDir;

    fn handler() -> (CommandHandler, Arc<WalWriter>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(8));
        let wal = Arc::new(
            WalWriter::open(
                dir.path().join("wal.log"),
                dir.path().to_path_buf(),
                u64::MAX,
                5,
            )
            .unwrap(),
        );
        (CommandHandler::new(store, Arc::clone(&wal)), wal, dir)
    }

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::Array(
            parts
                .iter()
                .map(|p| RespValue::bulk_string(Bytes::copy_from_slice(p.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn ping_pongs() {
        let (handler, _wal, _dir) = handler();
        assert_eq!(handler.execute(cmd(&["PING"])).serialize(), b"+PONG\r\n");
        // Verbs are case-insensitive
        assert_eq!(handler.execute(cmd(&["ping"])).serialize(), b"+PONG\r\n");
    }

    #[test]
    fn set_get_del_get_cycle() {
        let (handler, _wal, _dir) = handler();

        assert_eq!(
            handler.execute(cmd(&["SET", "foo", "bar"])).serialize(),
            b"+OK\r\n"
        );
        assert_eq!(handler.execute(cmd(&["GET", "foo"])).serialize(), b"+bar\r\n");
        assert_eq!(handler.execute(cmd(&["DEL", "foo"])).serialize(), b":1\r\n");
        assert_eq!(
            handler.execute(cmd(&["GET", "foo"])).serialize(),
            b"+(nil)\r\n"
        );
        // Deleting again reports nothing removed
        assert_eq!(handler.execute(cmd(&["DEL", "foo"])).serialize(), b":0\r\n");
    }

    #[test]
    fn set_with_ex_reports_a_ttl() {
        let (handler, wal, _dir) = handler();

        assert_eq!(
            handler
                .execute(cmd(&["SET", "session", "tok", "EX", "100"]))
                .serialize(),
            b"+OK\r\n"
        );
        match handler.execute(cmd(&["TTL", "session"])) {
            RespValue::Integer(s) => assert!(s > 0 && s <= 100),
            other => panic!("expected integer TTL, got {:?}", other),
        }

        // The logged record carries the absolute deadline
        wal.flush().unwrap();
        let records = read_records(wal.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].expire_at >= unix_now());
        assert!(records[0].expire_at <= unix_now() + 100);
    }

    #[test]
    fn second_granularity_ttl_expires() {
        let (handler, _wal, _dir) = handler();

        assert_eq!(
            handler.execute(cmd(&["SET", "k", "v", "EX", "1"])).serialize(),
            b"+OK\r\n"
        );
        match handler.execute(cmd(&["TTL", "k"])) {
            RespValue::Integer(s) => assert!((0..=1).contains(&s)),
            other => panic!("expected integer TTL, got {:?}", other),
        }

        std::thread::sleep(std::time::Duration::from_millis(2100));

        assert_eq!(handler.execute(cmd(&["GET", "k"])).serialize(), b"+(nil)\r\n");
        assert_eq!(handler.execute(cmd(&["TTL", "k"])).serialize(), b":-2\r\n");
    }

    #[test]
    fn ttl_sentinels() {
        let (handler, _wal, _dir) = handler();

        assert_eq!(
            handler.execute(cmd(&["TTL", "missing"])).serialize(),
            b":-2\r\n"
        );
        handler.execute(cmd(&["SET", "k", "v"]));
        assert_eq!(handler.execute(cmd(&["TTL", "k"])).serialize(), b":-1\r\n");
    }

    #[test]
    fn flushdb_empties_the_store() {
        let (handler, _wal, _dir) = handler();

        handler.execute(cmd(&["SET", "a", "1"]));
        handler.execute(cmd(&["SET", "b", "2"]));
        assert_eq!(handler.execute(cmd(&["FLUSHDB"])).serialize(), b"+OK\r\n");
        assert_eq!(handler.execute(cmd(&["GET", "a"])).serialize(), b"+(nil)\r\n");
        assert_eq!(handler.execute(cmd(&["GET", "b"])).serialize(), b"+(nil)\r\n");
    }

    #[test]
    fn expire_on_missing_key_does_not_linger() {
        let (handler, _wal, _dir) = handler();

        assert_eq!(
            handler.execute(cmd(&["EXPIRE", "ghost", "10"])).serialize(),
            b":0\r\n"
        );
        assert_eq!(
            handler.execute(cmd(&["SET", "ghost", "v"])).serialize(),
            b"+OK\r\n"
        );
        // The earlier EXPIRE must not attach to the new value
        assert_eq!(handler.execute(cmd(&["TTL", "ghost"])).serialize(), b":-1\r\n");
    }

    #[test]
    fn expire_on_live_key_updates_deadline() {
        let (handler, _wal, _dir) = handler();

        handler.execute(cmd(&["SET", "k", "v"]));
        assert_eq!(
            handler.execute(cmd(&["EXPIRE", "k", "50"])).serialize(),
            b":1\r\n"
        );
        match handler.execute(cmd(&["TTL", "k"])) {
            RespValue::Integer(s) => assert!(s > 0 && s <= 50),
            other => panic!("expected integer TTL, got {:?}", other),
        }
    }

    #[test]
    fn every_acknowledged_mutation_is_in_the_wal() {
        let (handler, wal, _dir) = handler();

        handler.execute(cmd(&["SET", "a", "1"]));
        handler.execute(cmd(&["GET", "a"]));
        handler.execute(cmd(&["EXPIRE", "a", "100"]));
        handler.execute(cmd(&["TTL", "a"]));
        handler.execute(cmd(&["DEL", "a"]));
        handler.execute(cmd(&["PING"]));
        handler.execute(cmd(&["FLUSHDB"]));

        wal.flush().unwrap();
        let commands: Vec<WalCommand> = read_records(wal.path())
            .unwrap()
            .into_iter()
            .map(|r| r.command)
            .collect();
        // Mutations in execution order; reads and PING never logged
        assert_eq!(
            commands,
            vec![
                WalCommand::Set,
                WalCommand::Expire,
                WalCommand::Del,
                WalCommand::FlushDb,
            ]
        );
    }

    #[test]
    fn rejected_commands_never_reach_the_wal() {
        let (handler, wal, _dir) = handler();

        for bad in [
            cmd(&["SET", "only-key"]),
            cmd(&["SET", "k", "v", "PX", "100"]),
            cmd(&["SET", "k", "v", "EX"]),
            cmd(&["SET", "k", "v", "EX", "0"]),
            cmd(&["SET", "k", "v", "EX", "-5"]),
            cmd(&["SET", "k", "v", "EX", "soon"]),
            cmd(&["DEL"]),
            cmd(&["DEL", "a", "b"]),
            cmd(&["EXPIRE", "k"]),
            cmd(&["EXPIRE", "k", "ten"]),
            cmd(&["FLUSHDB", "now"]),
            cmd(&["PING", "hello"]),
            cmd(&["NOSUCHVERB", "k"]),
        ] {
            let reply = handler.execute(bad);
            assert!(matches!(reply, RespValue::Error(_)), "got {:?}", reply);
        }

        wal.flush().unwrap();
        assert!(read_records(wal.path()).unwrap().is_empty());
    }

    #[test]
    fn non_utf8_keys_are_rejected() {
        let (handler, _wal, _dir) = handler();

        let reply = handler.execute(RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("GET")),
            RespValue::bulk_string(Bytes::from(vec![0xff, 0xfe])),
        ]));
        assert!(matches!(reply, RespValue::Error(_)));

        let reply = handler.execute(RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("GET")),
            RespValue::bulk_string(Bytes::new()),
        ]));
        assert!(matches!(reply, RespValue::Error(_)));
    }

    #[test]
    fn values_may_be_binary() {
        let (handler, _wal, _dir) = handler();

        // 0xFF/0xFE and a lone continuation byte are not valid UTF-8 in
        // any position; the value must still round-trip byte-for-byte
        let blob = vec![0x00, 0xff, 0xfe, 0x80, b'x'];
        let reply = handler.execute(RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("SET")),
            RespValue::bulk_string(Bytes::from("blob")),
            RespValue::bulk_string(Bytes::from(blob.clone())),
        ]));
        assert_eq!(reply.serialize(), b"+OK\r\n");

        let reply = handler.execute(cmd(&["GET", "blob"]));
        assert_eq!(reply, RespValue::SimpleBytes(Bytes::from(blob.clone())));

        let mut expected = vec![b'+'];
        expected.extend_from_slice(&blob);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(reply.serialize(), expected);
    }
}
