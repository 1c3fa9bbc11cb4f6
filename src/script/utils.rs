use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{SecondsFormat, Utc};
use hmac::{digest::InvalidLength, Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use rhai::{Engine, EvalAltResult, Module, FLOAT, INT};
use sha2::{Digest, Sha256, Sha512};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Longest string `random::string` will build in one call.
pub const MAX_RANDOM_STRING_LEN: usize = 65_536;

pub fn base64_encode(input: &str) -> String {
    STANDARD.encode(input.as_bytes())
}

pub fn base64_decode(input: &str) -> Result<String, base64::DecodeError> {
    let bytes = STANDARD.decode(input.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn sha512_hex(input: &str) -> String {
    hex::encode(Sha512::digest(input.as_bytes()))
}

pub fn hmac_sha256_hex(key: &str, message: &str) -> Result<String, InvalidLength> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn hmac_sha512_hex(key: &str, message: &str) -> Result<String, InvalidLength> {
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key.as_bytes())?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn random_int(min: i64, max: i64) -> i64 {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(low..=high)
}

/// Uniform float in `[min, max)`; bounds must be finite with a finite span.
pub fn random_float(min: f64, max: f64) -> Result<f64, String> {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    if !low.is_finite() || !high.is_finite() || !(high - low).is_finite() {
        return Err(format!("random::float bounds must be finite, got {min} and {max}"));
    }
    if low == high {
        return Ok(low);
    }
    Ok(rand::thread_rng().gen_range(low..high))
}

pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn random_name() -> String {
    petname::petname(2, "-")
}

pub fn random_email() -> String {
    format!("{}@example.com", random_name().replace('-', "."))
}

fn base64_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("encode", |input: &str| -> FnResult<String> {
        Ok(base64_encode(input))
    });
    module.set_native_fn("decode", |input: &str| -> FnResult<String> {
        base64_decode(input).map_err(|err| format!("invalid base64 input: {err}").into())
    });
    module
}

fn crypto_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("md5", |input: &str| -> FnResult<String> { Ok(md5_hex(input)) });
    module.set_native_fn("sha256", |input: &str| -> FnResult<String> {
        Ok(sha256_hex(input))
    });
    module.set_native_fn("sha512", |input: &str| -> FnResult<String> {
        Ok(sha512_hex(input))
    });
    module.set_native_fn("hmacSha256", |key: &str, message: &str| -> FnResult<String> {
        hmac_sha256_hex(key, message).map_err(|err| format!("invalid hmac key: {err}").into())
    });
    module.set_native_fn("hmacSha512", |key: &str, message: &str| -> FnResult<String> {
        hmac_sha512_hex(key, message).map_err(|err| format!("invalid hmac key: {err}").into())
    });
    module
}

fn random_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("uuid", || -> FnResult<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    });
    module.set_native_fn("timestamp", || -> FnResult<INT> { Ok(Utc::now().timestamp() as INT) });
    module.set_native_fn("isoTimestamp", || -> FnResult<String> {
        Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
    });
    module.set_native_fn("int", || -> FnResult<INT> { Ok(random_int(0, 1000) as INT) });
    module.set_native_fn("int", |min: INT, max: INT| -> FnResult<INT> {
        Ok(random_int(min as i64, max as i64) as INT)
    });
    module.set_native_fn("float", || -> FnResult<FLOAT> {
        random_float(0.0, 1.0).map(|f| f as FLOAT).map_err(Into::into)
    });
    module.set_native_fn("float", |min: FLOAT, max: FLOAT| -> FnResult<FLOAT> {
        random_float(min as f64, max as f64)
            .map(|f| f as FLOAT)
            .map_err(Into::into)
    });
    module.set_native_fn("string", || -> FnResult<String> { Ok(random_string(10)) });
    module.set_native_fn("string", |len: INT| -> FnResult<String> {
        let len = len.max(0) as usize;
        if len > MAX_RANDOM_STRING_LEN {
            return Err(format!(
                "random::string length must be at most {MAX_RANDOM_STRING_LEN}, got {len}"
            )
            .into());
        }
        Ok(random_string(len))
    });
    module.set_native_fn("name", || -> FnResult<String> { Ok(random_name()) });
    module.set_native_fn("bool", || -> FnResult<bool> { Ok(rand::random()) });
    module.set_native_fn("email", || -> FnResult<String> { Ok(random_email()) });
    module
}

/// Installs the `base64::`, `crypto::` and `random::` namespaces.
pub(crate) fn register_utils(engine: &mut Engine) {
    engine.register_static_module("base64", base64_module().into());
    engine.register_static_module("crypto", crypto_module().into());
    engine.register_static_module("random", random_module().into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        register_utils(&mut engine);
        engine
    }

    #[test]
    fn digests_are_lowercase_hex() {
        assert_eq!(md5_hex("hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            hmac_sha256_hex("secret", "hello").unwrap(),
            "88aab3ede8d3adf94d26ab90d3bafd4a2083070c3bcce9c014ee04a443847c0b"
        );
        assert_eq!(sha512_hex("").len(), 128);
        assert_eq!(hmac_sha512_hex("k", "m").unwrap().len(), 128);
        assert_eq!(hmac_sha256_hex("", "m").unwrap().len(), 64);
    }

    #[test]
    fn base64_round_trips_through_scripts() {
        let out: String = engine()
            .eval(r#"base64::decode(base64::encode("user:pass"))"#)
            .unwrap();
        assert_eq!(out, "user:pass");
        assert_eq!(base64_encode("user:pass"), "dXNlcjpwYXNz");
        assert!(engine().eval::<String>(r#"base64::decode("%%%")"#).is_err());
    }

    #[test]
    fn random_values_respect_bounds() {
        for _ in 0..50 {
            let n = random_int(3, 5);
            assert!((3..=5).contains(&n));
            let f = random_float(1.0, 2.0).unwrap();
            assert!((1.0..2.0).contains(&f));
        }
        assert_eq!(random_int(7, 7), 7);
        assert_eq!(random_string(12).len(), 12);
        assert!(random_email().ends_with("@example.com"));
    }

    #[test]
    fn random_namespace_is_callable() {
        let engine = engine();
        let id: String = engine.eval("random::uuid()").unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        let n: INT = engine.eval("random::int(1, 10)").unwrap();
        assert!((1..=10).contains(&n));
        let iso: String = engine.eval("random::isoTimestamp()").unwrap();
        assert!(iso.ends_with('Z'));
        let ts: INT = engine.eval("random::timestamp()").unwrap();
        assert!(ts > 1_600_000_000);
        let _: bool = engine.eval("random::bool()").unwrap();
        let s: String = engine.eval("random::string(4)").unwrap();
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn non_finite_float_bounds_are_rejected() {
        assert!(random_float(0.0, f64::INFINITY).is_err());
        assert!(random_float(f64::NAN, 1.0).is_err());
        assert!(random_float(-f64::MAX, f64::MAX).is_err());
        assert_eq!(random_float(2.5, 2.5), Ok(2.5));

        let err = engine()
            .eval::<FLOAT>(r#"random::float(0.0, parse_float("inf"))"#)
            .unwrap_err();
        assert!(err.to_string().contains("must be finite"), "{err}");
    }

    #[test]
    fn random_string_length_is_capped() {
        let engine = engine();
        let max = format!("random::string({MAX_RANDOM_STRING_LEN})");
        assert_eq!(engine.eval::<String>(&max).unwrap().len(), MAX_RANDOM_STRING_LEN);
        let err = engine
            .eval::<String>("random::string(300000000)")
            .unwrap_err();
        assert!(err.to_string().contains("at most"), "{err}");
    }
}
