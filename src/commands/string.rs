//! String, arithmetic and expiration commands.
//!
//! Each function runs with the selected database already locked, receives
//! the arguments after the command name, and has had its arity checked.

use crate::commands::error::{CommandError, CommandResult};
use crate::commands::handler::{parse_float, parse_int};
use crate::protocol::RespValue;
use crate::storage::{format_float, now_millis, Entry, Keyspace, StorageError};
use bytes::Bytes;

/// SET key value [NX]
pub fn set(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let nx = match args.get(2) {
        None => false,
        Some(opt) if opt.eq_ignore_ascii_case(b"NX") => true,
        Some(_) => return Err(CommandError::Syntax),
    };

    let (key, value) = (args[0].clone(), args[1].clone());
    if nx {
        if !ks.set_string_nx(key, value) {
            return Err(CommandError::KeyExists);
        }
    } else {
        ks.set_string(key, value);
    }
    Ok(RespValue::ok())
}

/// GET key
pub fn get(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    Ok(match ks.get_string(&args[0])? {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null(),
    })
}

/// APPEND key value
pub fn append(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let len = ks.append(&args[0], &args[1])?;
    Ok(RespValue::integer(len as i64))
}

/// STRLEN key
pub fn strlen(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(ks.strlen(&args[0])? as i64))
}

/// MGET key [key ...]
///
/// Missing keys and keys holding lists both come back as nil.
pub fn mget(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    let values = args
        .iter()
        .map(|key| match ks.get_string(key) {
            Ok(Some(value)) => RespValue::bulk_string(value),
            _ => RespValue::null(),
        })
        .collect();
    Ok(RespValue::array(values))
}

/// MSET key value [key value ...]
pub fn mset(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    for pair in args.chunks_exact(2) {
        ks.set_string(pair[0].clone(), pair[1].clone());
    }
    Ok(RespValue::ok())
}

/// MSETNX key value [key value ...]
///
/// Writes nothing unless every key is absent or expired.
pub fn msetnx(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let pairs = args
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    Ok(RespValue::integer(ks.set_many_nx(pairs) as i64))
}

/// INCR / DECR / INCRBY / DECRBY, with the sign already applied by the
/// caller where the delta is fixed.
pub fn incr_by(ks: &mut Keyspace, key: &Bytes, delta: i64) -> CommandResult {
    Ok(RespValue::integer(ks.incr_by(key, delta)?))
}

/// INCRBY key increment
pub fn incrby(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    incr_by(ks, &args[0], parse_int(&args[1])?)
}

/// DECRBY key decrement
pub fn decrby(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let delta = parse_int(&args[1])?
        .checked_neg()
        .ok_or(StorageError::Overflow)?;
    incr_by(ks, &args[0], delta)
}

/// INCRBYFLOAT key increment
pub fn incrbyfloat(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    float_by(ks, &args[0], parse_float(&args[1])?)
}

/// DECRBYFLOAT key decrement
pub fn decrbyfloat(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    float_by(ks, &args[0], -parse_float(&args[1])?)
}

fn float_by(ks: &mut Keyspace, key: &Bytes, delta: f64) -> CommandResult {
    let next = ks.incr_by_float(key, delta)?;
    Ok(RespValue::bulk_string(format_float(next)))
}

/// SETEX key seconds value
pub fn setex(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let seconds = parse_int(&args[1])?;
    if seconds <= 0 {
        return Err(CommandError::InvalidArgument(
            "invalid expire time in 'setex' command".to_string(),
        ));
    }
    let entry = Entry::string(args[2].clone()).with_expiry(deadline_after(seconds));
    ks.put(args[0].clone(), entry);
    Ok(RespValue::ok())
}

/// EXPIRE key seconds
///
/// 1 when the timeout was set, 0 when the key is absent or expired. A
/// non-positive timeout expires the key immediately.
pub fn expire(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let seconds = parse_int(&args[1])?;
    let set = ks.expire_at(&args[0], deadline_after(seconds));
    Ok(RespValue::integer(set as i64))
}

fn deadline_after(seconds: i64) -> i64 {
    now_millis().saturating_add(seconds.saturating_mul(1000))
}

/// TTL key
///
/// Remaining lifetime rounded up to whole seconds, so a live key never
/// reports 0.
pub fn ttl(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    let ms = ks.pttl(&args[0]);
    let secs = if ms < 0 { ms } else { (ms + 999) / 1000 };
    Ok(RespValue::integer(secs))
}

/// PTTL key
pub fn pttl(ks: &Keyspace, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(ks.pttl(&args[0])))
}

/// PERSIST key
pub fn persist(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(ks.persist(&args[0]) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ListEnd;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_set_nx() {
        let mut ks = Keyspace::new();
        assert_eq!(set(&mut ks, &args(&["k", "v1", "nx"])), Ok(RespValue::ok()));
        assert_eq!(
            set(&mut ks, &args(&["k", "v2", "NX"])),
            Err(CommandError::KeyExists)
        );
        assert_eq!(
            get(&ks, &args(&["k"])),
            Ok(RespValue::bulk_string(Bytes::from("v1")))
        );
        assert_eq!(set(&mut ks, &args(&["k", "v", "XX"])), Err(CommandError::Syntax));
    }

    #[test]
    fn test_set_nx_over_expired_key() {
        let mut ks = Keyspace::new();
        ks.put(
            Bytes::from("k"),
            Entry::string("old").with_expiry(now_millis() - 1),
        );
        assert_eq!(set(&mut ks, &args(&["k", "new", "NX"])), Ok(RespValue::ok()));
    }

    #[test]
    fn test_set_clears_ttl() {
        let mut ks = Keyspace::new();
        setex(&mut ks, &args(&["k", "100", "v"])).unwrap();
        set(&mut ks, &args(&["k", "v2"])).unwrap();
        assert_eq!(pttl(&ks, &args(&["k"])), Ok(RespValue::integer(-1)));
    }

    #[test]
    fn test_get_wrong_type() {
        let mut ks = Keyspace::new();
        ks.push(&Bytes::from("l"), ListEnd::Tail, args(&["a"])).unwrap();
        let err = get(&ks, &args(&["l"])).unwrap_err();
        assert_eq!(err.category(), "WRONGTYPE");
    }

    #[test]
    fn test_mget_mixes_hits_and_misses() {
        let mut ks = Keyspace::new();
        mset(&mut ks, &args(&["a", "1", "b", "2"])).unwrap();
        ks.push(&Bytes::from("l"), ListEnd::Tail, args(&["x"])).unwrap();

        assert_eq!(
            mget(&ks, &args(&["a", "missing", "l", "b"])),
            Ok(RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("1")),
                RespValue::null(),
                RespValue::null(),
                RespValue::bulk_string(Bytes::from("2")),
            ]))
        );
    }

    #[test]
    fn test_msetnx() {
        let mut ks = Keyspace::new();
        assert_eq!(msetnx(&mut ks, &args(&["a", "1", "b", "2"])), Ok(RespValue::integer(1)));
        assert_eq!(msetnx(&mut ks, &args(&["c", "3", "a", "9"])), Ok(RespValue::integer(0)));
        assert!(ks.get(b"c").is_none());
        assert_eq!(ks.get_string(b"a"), Ok(Some(Bytes::from("1"))));
    }

    #[test]
    fn test_arithmetic() {
        let mut ks = Keyspace::new();
        let key = Bytes::from("n");
        assert_eq!(incr_by(&mut ks, &key, 1), Ok(RespValue::integer(1)));
        assert_eq!(incrby(&mut ks, &args(&["n", "10"])), Ok(RespValue::integer(11)));
        assert_eq!(decrby(&mut ks, &args(&["n", "20"])), Ok(RespValue::integer(-9)));
        assert_eq!(
            incrby(&mut ks, &args(&["n", "ten"])),
            Err(CommandError::Storage(StorageError::NotInteger))
        );
        assert_eq!(
            decrby(&mut ks, &args(&["n", i64::MIN.to_string().as_str()])),
            Err(CommandError::Storage(StorageError::Overflow))
        );
    }

    #[test]
    fn test_float_arithmetic() {
        let mut ks = Keyspace::new();
        assert_eq!(
            incrbyfloat(&mut ks, &args(&["f", "10.5"])),
            Ok(RespValue::bulk_string(Bytes::from("10.5")))
        );
        assert_eq!(
            decrbyfloat(&mut ks, &args(&["f", "0.5"])),
            Ok(RespValue::bulk_string(Bytes::from("10")))
        );
        assert!(incrbyfloat(&mut ks, &args(&["f", "abc"])).is_err());
    }

    #[test]
    fn test_expire_return_codes() {
        let mut ks = Keyspace::new();
        assert_eq!(expire(&mut ks, &args(&["k", "10"])), Ok(RespValue::integer(0)));

        set(&mut ks, &args(&["k", "v"])).unwrap();
        assert_eq!(expire(&mut ks, &args(&["k", "10"])), Ok(RespValue::integer(1)));

        let ttl = ttl(&ks, &args(&["k"])).unwrap().as_integer().unwrap();
        assert!(ttl > 0 && ttl <= 10);
    }

    #[test]
    fn test_ttl_of_missing_and_persistent_keys() {
        let mut ks = Keyspace::new();
        assert_eq!(ttl(&ks, &args(&["k"])), Ok(RespValue::integer(-2)));
        set(&mut ks, &args(&["k", "v"])).unwrap();
        assert_eq!(ttl(&ks, &args(&["k"])), Ok(RespValue::integer(-1)));
    }

    #[test]
    fn test_ttl_rounds_up() {
        let mut ks = Keyspace::new();
        ks.put(
            Bytes::from("k"),
            Entry::string("v").with_expiry(now_millis() + 1_500),
        );
        assert_eq!(ttl(&ks, &args(&["k"])), Ok(RespValue::integer(2)));
    }

    #[test]
    fn test_setex() {
        let mut ks = Keyspace::new();
        assert_eq!(setex(&mut ks, &args(&["k", "5", "v"])), Ok(RespValue::ok()));
        assert_eq!(ks.get_string(b"k"), Ok(Some(Bytes::from("v"))));
        let left = ks.pttl(b"k");
        assert!(left > 4_000 && left <= 5_000);

        assert!(setex(&mut ks, &args(&["k", "0", "v"])).is_err());
        assert!(setex(&mut ks, &args(&["k", "soon", "v"])).is_err());
    }

    #[test]
    fn test_persist() {
        let mut ks = Keyspace::new();
        setex(&mut ks, &args(&["k", "5", "v"])).unwrap();
        assert_eq!(persist(&mut ks, &args(&["k"])), Ok(RespValue::integer(1)));
        assert_eq!(persist(&mut ks, &args(&["k"])), Ok(RespValue::integer(0)));
        assert_eq!(ttl(&ks, &args(&["k"])), Ok(RespValue::integer(-1)));
    }

    #[test]
    fn test_append_and_strlen() {
        let mut ks = Keyspace::new();
        assert_eq!(append(&mut ks, &args(&["k", "Hello"])), Ok(RespValue::integer(5)));
        assert_eq!(append(&mut ks, &args(&["k", " World"])), Ok(RespValue::integer(11)));
        assert_eq!(strlen(&ks, &args(&["k"])), Ok(RespValue::integer(11)));
        assert_eq!(strlen(&ks, &args(&["missing"])), Ok(RespValue::integer(0)));
    }
}
