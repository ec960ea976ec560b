//! List commands, including the blocking pops.
//!
//! BLPOP/BRPOP poll: each round locks the database once, scans the keys in
//! the order given and pops from the first non-empty list. When nothing is
//! ready the caller sleeps for the poll interval and tries again, so a push
//! is noticed at most one interval late. The wait ends at the deadline or
//! when the server stops, and either way the reply is nil.

use crate::commands::error::{CommandError, CommandResult};
use crate::commands::handler::parse_int;
use crate::protocol::RespValue;
use crate::shutdown::Shutdown;
use crate::storage::{Database, Keyspace, ListEnd};
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// LPUSH / RPUSH key value [value ...]
pub fn push(ks: &mut Keyspace, args: &[Bytes], end: ListEnd) -> CommandResult {
    let len = ks.push(&args[0], end, args[1..].to_vec())?;
    Ok(RespValue::integer(len as i64))
}

/// LPOP / RPOP key
pub fn pop(ks: &mut Keyspace, args: &[Bytes], end: ListEnd) -> CommandResult {
    Ok(match ks.pop(&args[0], end)? {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null(),
    })
}

/// LLEN key
pub fn llen(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(ks.llen(&args[0])? as i64))
}

/// LINDEX key index
pub fn lindex(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    Ok(match ks.lindex(&args[0], parse_int(&args[1])?)? {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null(),
    })
}

/// LRANGE key start stop
pub fn lrange(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    Ok(RespValue::bulk_array(ks.lrange(&args[0], start, stop)?))
}

/// Parses the trailing timeout of BLPOP/BRPOP. `None` means wait forever.
pub fn parse_timeout(arg: &[u8]) -> CommandResult<Option<Duration>> {
    let secs = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .ok_or_else(|| {
            CommandError::InvalidArgument("timeout is not a float or out of range".to_string())
        })?;

    if secs < 0.0 {
        return Err(CommandError::InvalidArgument("timeout is negative".to_string()));
    }
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| CommandError::InvalidArgument("timeout is out of range".to_string()))
}

/// How a blocking pop waits between scans.
#[derive(Debug, Clone)]
pub struct BlockingWait {
    pub poll_interval: Duration,
    pub shutdown: Shutdown,
}

/// BLPOP / BRPOP key [key ...] timeout
pub async fn blocking_pop(
    db: &Database,
    args: &[Bytes],
    end: ListEnd,
    wait: &BlockingWait,
) -> CommandResult {
    let (keys, timeout) = args.split_at(args.len() - 1);
    let timeout = parse_timeout(&timeout[0])?;
    // A deadline past what the clock can represent means wait forever.
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let mut shutdown = wait.shutdown.clone();

    loop {
        if let Some((key, value)) = try_pop_first(db, keys, end)? {
            return Ok(RespValue::bulk_array([key, value]));
        }

        if shutdown.is_shutdown() {
            return Ok(RespValue::null());
        }

        let mut nap = wait.poll_interval;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                trace!(db = db.index(), "blocking pop timed out");
                return Ok(RespValue::null());
            }
            nap = nap.min(deadline - now);
        }

        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            _ = shutdown.recv() => {
                trace!(db = db.index(), "blocking pop interrupted by shutdown");
                return Ok(RespValue::null());
            }
        }
    }
}

/// One scan: pops from the first key holding a non-empty list.
fn try_pop_first(
    db: &Database,
    keys: &[Bytes],
    end: ListEnd,
) -> CommandResult<Option<(Bytes, Bytes)>> {
    let mut ks = db.lock();
    for key in keys {
        if let Some(value) = ks.pop(key, end)? {
            return Ok(Some((key.clone(), value)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    fn wait() -> BlockingWait {
        BlockingWait {
            poll_interval: Duration::from_millis(10),
            shutdown: Shutdown::never(),
        }
    }

    #[test]
    fn test_push_pop() {
        let mut ks = Keyspace::new();
        assert_eq!(push(&mut ks, &args(&["l", "a", "b"]), ListEnd::Head), Ok(RespValue::integer(2)));
        assert_eq!(push(&mut ks, &args(&["l", "c"]), ListEnd::Tail), Ok(RespValue::integer(3)));
        assert_eq!(llen(&ks, &args(&["l"])), Ok(RespValue::integer(3)));

        assert_eq!(
            pop(&mut ks, &args(&["l"]), ListEnd::Head),
            Ok(RespValue::bulk_string(Bytes::from("b")))
        );
        assert_eq!(
            pop(&mut ks, &args(&["l"]), ListEnd::Tail),
            Ok(RespValue::bulk_string(Bytes::from("c")))
        );
        assert_eq!(pop(&mut ks, &args(&["missing"]), ListEnd::Head), Ok(RespValue::null()));
    }

    #[test]
    fn test_push_onto_string_fails() {
        let mut ks = Keyspace::new();
        ks.set_string(Bytes::from("s"), Bytes::from("v"));
        let err = push(&mut ks, &args(&["s", "x"]), ListEnd::Head).unwrap_err();
        assert_eq!(err.category(), "WRONGTYPE");
    }

    #[test]
    fn test_lrange_and_lindex() {
        let mut ks = Keyspace::new();
        push(&mut ks, &args(&["l", "a", "b", "c"]), ListEnd::Tail).unwrap();
        assert_eq!(
            lrange(&ks, &args(&["l", "0", "-1"])),
            Ok(RespValue::bulk_array(args(&["a", "b", "c"])))
        );
        assert_eq!(
            lindex(&ks, &args(&["l", "-1"])),
            Ok(RespValue::bulk_string(Bytes::from("c")))
        );
        assert!(lrange(&ks, &args(&["l", "x", "1"])).is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(b"0"), Ok(None));
        assert_eq!(parse_timeout(b"1.5"), Ok(Some(Duration::from_millis(1500))));
        assert!(parse_timeout(b"-1").is_err());
        assert!(parse_timeout(b"soon").is_err());
        assert!(parse_timeout(b"inf").is_err());
        assert_eq!(
            parse_timeout(b"1e300"),
            Err(CommandError::InvalidArgument("timeout is out of range".to_string()))
        );
        assert!(matches!(parse_timeout(b"1e19"), Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_blpop_takes_first_ready_key_in_order() {
        let db = Database::new(0);
        db.lock()
            .push(&Bytes::from("b"), ListEnd::Tail, args(&["b1"]))
            .unwrap();
        db.lock()
            .push(&Bytes::from("c"), ListEnd::Tail, args(&["c1"]))
            .unwrap();

        let reply = blocking_pop(&db, &args(&["a", "b", "c", "1"]), ListEnd::Head, &wait())
            .await
            .unwrap();
        assert_eq!(reply, RespValue::bulk_array(args(&["b", "b1"])));
    }

    #[tokio::test]
    async fn test_brpop_pops_tail() {
        let db = Database::new(0);
        db.lock()
            .push(&Bytes::from("q"), ListEnd::Tail, args(&["1", "2"]))
            .unwrap();
        let reply = blocking_pop(&db, &args(&["q", "0"]), ListEnd::Tail, &wait())
            .await
            .unwrap();
        assert_eq!(reply, RespValue::bulk_array(args(&["q", "2"])));
    }

    #[tokio::test]
    async fn test_blpop_times_out() {
        let db = Database::new(0);
        let started = std::time::Instant::now();
        let reply = blocking_pop(&db, &args(&["a", "b", "0.2"]), ListEnd::Head, &wait())
            .await
            .unwrap();
        let waited = started.elapsed();

        assert_eq!(reply, RespValue::null());
        assert!(waited >= Duration::from_millis(200));
        assert!(waited < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_blpop_sees_later_push() {
        let db = Arc::new(Database::new(0));
        let pusher = Arc::clone(&db);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pusher
                .lock()
                .push(&Bytes::from("jobs"), ListEnd::Tail, vec![Bytes::from("job-1")])
                .unwrap();
        });

        let reply = blocking_pop(&db, &args(&["jobs", "0"]), ListEnd::Head, &wait())
            .await
            .unwrap();
        assert_eq!(reply, RespValue::bulk_array(args(&["jobs", "job-1"])));
    }

    #[tokio::test]
    async fn test_blpop_returns_nil_on_shutdown() {
        let db = Database::new(0);
        let (tx, rx) = watch::channel(false);
        let wait = BlockingWait {
            poll_interval: Duration::from_millis(10),
            shutdown: Shutdown::new(rx),
        };

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send_replace(true);
            tx
        });

        let reply = blocking_pop(&db, &args(&["jobs", "0"]), ListEnd::Head, &wait)
            .await
            .unwrap();
        assert_eq!(reply, RespValue::null());
        drop(stopper.await.unwrap());
    }

    #[tokio::test]
    async fn test_blpop_huge_timeout_is_an_error() {
        let db = Database::new(0);
        let err = blocking_pop(&db, &args(&["k", "1e300"]), ListEnd::Head, &wait())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::InvalidArgument("timeout is out of range".to_string())
        );
    }

    #[tokio::test]
    async fn test_brpop_unrepresentable_deadline_still_pops() {
        let db = Database::new(0);
        db.lock()
            .push(&Bytes::from("k"), ListEnd::Tail, args(&["v"]))
            .unwrap();
        let reply = blocking_pop(&db, &args(&["k", "1e19"]), ListEnd::Tail, &wait())
            .await
            .unwrap();
        assert_eq!(reply, RespValue::bulk_array(args(&["k", "v"])));
    }

    #[tokio::test]
    async fn test_blpop_on_string_key_fails_fast() {
        let db = Database::new(0);
        db.lock().set_string(Bytes::from("s"), Bytes::from("v"));
        let err = blocking_pop(&db, &args(&["s", "0"]), ListEnd::Head, &wait())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "WRONGTYPE");
    }
}
