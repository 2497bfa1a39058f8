use crate::*;
use rand::Rng;
use std::borrow::Cow;

fn written(v: &Value) -> Result<Stream> {
    let mut s = Stream::new();
    s.write_value(v)?;
    Ok(s)
}

fn nested_arrays(levels: usize) -> Value {
    let mut v = Value::Array(vec![]);
    for _ in 1..levels {
        v = Value::Array(vec![v]);
    }
    v
}

fn sample_values() -> Vec<Value> {
    let mut map = Map::new();
    map.insert("a".into(), Value::Int64(-1));
    map.insert("b".into(), Value::String("x".repeat(70)));
    vec![
        Value::Nil,
        Value::Bool(true),
        Value::Float64(1.5),
        Value::Int64(-40_000),
        Value::Uint64(u64::MAX),
        Value::String("hello".into()),
        Value::Bytes(vec![1, 2, 3]),
        Value::Array(vec![Value::Int64(1), Value::String("two".into())]),
        Value::Map(map),
    ]
}

// ============================================================================
//  SCALAR TESTS (Happy Path)
// ============================================================================

#[test]
fn test_bool_and_nil_roundtrip() -> Result<()> {
    let mut s = Stream::new();
    s.write_bool(true);
    s.write_bool(false);
    s.write_nil();

    assert_eq!(s.read_bool()?, true);
    assert_eq!(s.read_bool()?, false);
    s.read_nil()?;
    assert!(s.is_read_finish());
    s.release();
    Ok(())
}

#[test]
fn test_int64_boundaries() -> Result<()> {
    let cases: [(i64, usize); 10] = [
        (-7, 1),
        (32, 1),
        (-8, 3),
        (33, 3),
        (-32_768, 3),
        (32_767, 3),
        (32_768, 5),
        (i32::MIN as i64, 5),
        (i32::MAX as i64 + 1, 9),
        (i64::MIN, 9),
    ];
    for (v, size) in cases {
        let mut s = Stream::new();
        s.write_int64(v);
        assert_eq!(s.write_pos() - BODY_POS, size, "size of {}", v);
        assert_eq!(s.read_int64()?, v);
        assert!(s.is_read_finish());
        s.release();
    }
    Ok(())
}

#[test]
fn test_uint64_boundaries() -> Result<()> {
    let cases: [(u64, usize); 7] = [
        (0, 1),
        (9, 1),
        (10, 3),
        (65_535, 3),
        (65_536, 5),
        (u32::MAX as u64, 5),
        (u64::MAX, 9),
    ];
    for (v, size) in cases {
        let mut s = Stream::new();
        s.write_uint64(v);
        assert_eq!(s.write_pos() - BODY_POS, size, "size of {}", v);
        assert_eq!(s.read_uint64()?, v);
        s.release();
    }
    Ok(())
}

#[test]
fn test_inline_tags() {
    let mut s = Stream::new();
    s.write_int64(-7);
    s.write_int64(32);
    s.write_uint64(0);
    s.write_uint64(9);
    assert_eq!(s.header().len(), HEADER_SIZE);
    assert_eq!(&s.to_bytes()[BODY_POS..], &[14, 53, 54, 63]);
    s.release();
}

#[test]
fn test_float64_zero_is_one_byte() -> Result<()> {
    let mut s = Stream::new();
    s.write_float64(0.0);
    assert_eq!(s.write_pos(), BODY_POS + 1);
    s.write_float64(-2.25);
    assert_eq!(s.write_pos(), BODY_POS + 10);

    assert_eq!(s.read_float64()?, 0.0);
    assert_eq!(s.read_float64()?, -2.25);
    s.release();
    Ok(())
}

// ============================================================================
//  BLOB TESTS (Happy Path)
// ============================================================================

#[test]
fn test_strings() -> Result<()> {
    let mut s = Stream::new();
    s.write_string("")?;
    s.write_string("hi")?;
    s.write_string(&"y".repeat(62))?;
    s.write_string(&"z".repeat(63))?;

    let bytes = s.to_bytes();
    assert_eq!(&bytes[BODY_POS..BODY_POS + 5], &[128, 130, b'h', b'i', 0]);

    assert_eq!(s.read_string()?, "");
    assert_eq!(s.read_string()?, "hi");
    assert_eq!(s.read_string()?, "y".repeat(62));
    assert_eq!(s.read_string()?, "z".repeat(63));
    assert!(s.is_read_finish());
    s.release();
    Ok(())
}

#[test]
fn test_bytes() -> Result<()> {
    let mut s = Stream::new();
    s.write_bytes(&[])?;
    s.write_bytes(&[9; 10])?;
    s.write_bytes(&[7; 300])?;

    assert_eq!(s.read_bytes()?, Vec::<u8>::new());
    assert_eq!(s.read_bytes()?, vec![9; 10]);
    assert_eq!(s.read_unsafe_bytes()?.len(), 300);
    assert!(s.is_read_finish());
    s.release();
    Ok(())
}

#[test]
fn test_nil_reads_as_empty_container() -> Result<()> {
    let mut s = Stream::new();
    s.write_nil();
    s.write_nil();
    s.write_nil();
    assert!(s.read_bytes()?.is_empty());
    assert!(s.read_array()?.is_empty());
    assert!(s.read_map()?.is_empty());
    s.release();
    Ok(())
}

// ============================================================================
//  CONTAINER TESTS (Happy Path)
// ============================================================================

#[test]
fn test_array_layout() -> Result<()> {
    let mut s = Stream::new();
    s.write_array(&[Value::Int64(1)])?;
    assert_eq!(&s.to_bytes()[BODY_POS..], &[65, 6, 0, 0, 0, 22]);
    assert_eq!(s.read_array()?, vec![Value::Int64(1)]);
    s.release();
    Ok(())
}

#[test]
fn test_long_array() -> Result<()> {
    let items: Vec<Value> = (0..100).map(Value::Int64).collect();
    let mut s = Stream::new();
    s.write_array(&items)?;
    assert_eq!(s.to_bytes()[BODY_POS], tag::ARRAY_LONG);
    assert_eq!(s.read_array()?, items);
    assert!(s.is_read_finish());
    s.release();
    Ok(())
}

#[test]
fn test_long_map_31_pairs() -> Result<()> {
    let keys = "123456789abcdefghijklmnopqrstuv";
    let map: Map = keys.chars().map(|c| (c.to_string(), Value::Bool(true))).collect();
    assert_eq!(map.len(), 31);

    let mut s = Stream::new();
    s.write_map(&map)?;
    assert_eq!(s.to_bytes()[BODY_POS], tag::MAP_LONG);

    assert_eq!(s.read_map()?, map);
    assert_eq!(s.read_pos(), s.write_pos());
    s.release();
    Ok(())
}

#[test]
fn test_nested_mixed() -> Result<()> {
    let mut inner = Map::new();
    inner.insert("list".into(), Value::Array(vec![Value::Nil, Value::Float64(3.5)]));
    inner.insert("raw".into(), Value::Bytes(vec![0xde, 0xad]));
    let v = Value::Array(vec![Value::Map(inner), Value::Array(vec![]), Value::Map(Map::new())]);

    let mut s = written(&v)?;
    assert_eq!(s.read_value()?, v);
    assert!(s.is_read_finish());
    s.release();
    Ok(())
}

#[test]
fn test_skip() -> Result<()> {
    let mut s = Stream::new();
    for v in sample_values() {
        s.write_value(&v)?;
    }
    s.write_string("end")?;
    for _ in 0..sample_values().len() {
        s.skip()?;
    }
    assert_eq!(s.read_string()?, "end");
    s.release();
    Ok(())
}

// ============================================================================
//  FRAMES AND HEADER
// ============================================================================

#[test]
fn test_write_across_frames() -> Result<()> {
    let long = "s".repeat(1500);
    let mut s = Stream::new();
    s.write_string("short")?;
    s.write_string(&long)?;
    assert!(s.segments() >= 4);

    assert!(matches!(s.read_unsafe_string()?, Cow::Borrowed("short")));
    let text = s.read_unsafe_string()?;
    assert!(matches!(text, Cow::Owned(_)));
    assert_eq!(text, long);

    s.reset();
    assert_eq!(s.segments(), 1);
    assert_eq!(s.write_pos(), BODY_POS);
    s.release();
    Ok(())
}

#[test]
fn test_slow_path_matches_fast_path() -> Result<()> {
    // Lands the same value on both sides of a frame boundary.
    let v = Value::Array(vec![Value::Uint64(1 << 40), Value::String("boundary".into())]);

    let mut fast = Stream::new();
    fast.write_value(&v)?;
    let expected = fast.to_bytes()[BODY_POS..].to_vec();

    for pad in 0..expected.len() {
        let mut s = Stream::new();
        s.write_bytes(&vec![0; FRAME_SIZE - BODY_POS - 5 - pad])?;
        let start = s.write_pos();
        s.write_value(&v)?;
        assert_eq!(&s.to_bytes()[start..], &expected[..]);
        s.skip()?;
        assert_eq!(s.read_value()?, v);
        s.release();
    }
    fast.release();
    Ok(())
}

#[test]
fn test_header_fields() -> Result<()> {
    let mut a = Stream::new();
    a.set_callback_id(11);
    a.set_session_id(22);
    a.set_machine_id(33);
    a.write_uint64(5);

    let mut b = Stream::new();
    b.copy_header_from(&a);
    assert_eq!(b.callback_id(), 11);
    assert_eq!(b.session_id(), 22);
    assert_eq!(b.machine_id(), 33);
    assert_eq!(b.write_pos(), BODY_POS);

    let mut c = Stream::from_bytes(&a.to_bytes())?;
    assert_eq!(c.session_id(), 22);
    assert_eq!(c.read_uint64()?, 5);

    a.reset();
    assert_eq!(a.callback_id(), 0);
    assert!(a.header().iter().all(|b| *b == 0));

    assert_eq!(Stream::from_bytes(&[0; 10]).err(), Some(Error::UnexpectedEnd));
    a.release();
    b.release();
    c.release();
    Ok(())
}

#[test]
fn test_cursor_bounds() {
    let mut s = Stream::new();
    s.write_nil();
    assert_eq!(s.set_read_pos(BODY_POS + 2), Err(Error::InvalidPosition(BODY_POS + 2)));
    assert_eq!(s.set_write_pos(3), Err(Error::InvalidPosition(3)));
    assert_eq!(s.set_write_pos(FRAME_SIZE + 1), Err(Error::InvalidPosition(FRAME_SIZE + 1)));
    s.set_write_pos_to_body_start();
    assert_eq!(s.remaining(), 0);
    s.release();
}

// ============================================================================
//  DECODER FAILURE MODES
// ============================================================================

#[test]
fn test_fail_truncated_any_length() -> Result<()> {
    for v in sample_values() {
        let mut s = written(&v)?;
        let full = s.write_pos();
        for len in BODY_POS..full {
            s.set_write_pos(len)?;
            assert!(s.read_value().is_err(), "{:?} truncated to {}", v, len);
            assert_eq!(s.read_pos(), BODY_POS);
        }
        s.set_write_pos(full)?;
        assert_eq!(s.read_value()?, v);
        s.release();
    }
    Ok(())
}

#[test]
fn test_fail_reserved_tags() {
    for b in [0u8, 12, 13] {
        assert!(tag::is_reserved(b));
        let mut s = Stream::new();
        s.put_bytes(&[b, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(s.read_nil(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_bool(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_int64(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_uint64(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_float64(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_string(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_bytes(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_array(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_map(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_value(), Err(Error::InvalidTag(b)));
        assert_eq!(s.skip(), Err(Error::InvalidTag(b)));
        assert_eq!(s.read_pos(), BODY_POS);
        s.release();
    }
}

#[test]
fn test_fail_wrong_kind_keeps_cursor() -> Result<()> {
    let mut s = Stream::new();
    s.write_string("text")?;
    assert_eq!(s.read_int64(), Err(Error::InvalidTag(132)));
    assert_eq!(s.read_pos(), BODY_POS);
    assert_eq!(s.read_string()?, "text");
    s.release();
    Ok(())
}

#[test]
fn test_fail_tampered_total_length() -> Result<()> {
    let v = Value::Array(vec![Value::Int64(1), Value::Int64(2)]);
    for delta in [-1i64, 1] {
        let mut s = written(&v)?;
        let total = s.u32_at(BODY_POS + 1)? as i64 + delta;
        s.patch_bytes(BODY_POS + 1, &(total as u32).to_le_bytes());
        s.write_nil();
        assert_eq!(s.read_array(), Err(Error::LengthMismatch));
        assert_eq!(s.read_pos(), BODY_POS);
        s.release();
    }
    Ok(())
}

#[test]
fn test_fail_short_long_form_count() {
    // Tag 95 with a count of 2 is not a canonical encoding.
    let mut s = Stream::new();
    s.put_bytes(&[tag::ARRAY_LONG, 11, 0, 0, 0, 2, 0, 0, 0, 54, 55]);
    assert_eq!(s.read_array(), Err(Error::LengthMismatch));
    assert_eq!(s.read_pos(), BODY_POS);
    s.release();
}

#[test]
fn test_fail_duplicate_map_key() {
    // Two pairs, both keyed "a"; the count would not survive decoding.
    let pair = [129, b'a', 0, tag::TRUE];
    let mut s = Stream::new();
    s.put_bytes(&[tag::MAP_EMPTY + 2, 13, 0, 0, 0]);
    s.put_bytes(&pair);
    s.put_bytes(&pair);
    assert_eq!(s.read_map(), Err(Error::LengthMismatch));
    assert_eq!(s.read_value(), Err(Error::LengthMismatch));
    assert_eq!(s.read_map_records().err(), Some(Error::LengthMismatch));
    assert_eq!(s.read_pos(), BODY_POS);
    assert!(s.skip().is_ok());
    s.release();
}

#[test]
fn test_fail_missing_terminator() -> Result<()> {
    let mut s = Stream::new();
    s.write_string("hi")?;
    s.patch_bytes(BODY_POS + 3, b"x");
    assert_eq!(s.read_string(), Err(Error::MissingTerminator));
    assert_eq!(s.read_pos(), BODY_POS);
    s.release();
    Ok(())
}

#[test]
fn test_fail_invalid_utf8() {
    let mut s = Stream::new();
    s.put_bytes(&[130, 0xff, 0xfe, 0]);
    assert_eq!(s.read_string(), Err(Error::InvalidUtf8));
    assert_eq!(s.read_unsafe_string().err(), Some(Error::InvalidUtf8));
    assert_eq!(s.read_value(), Err(Error::InvalidUtf8));
    assert_eq!(s.read_pos(), BODY_POS);
    s.release();
}

// ============================================================================
//  DEPTH BOUND
// ============================================================================

#[test]
fn test_write_depth_limit() -> Result<()> {
    let mut s = Stream::new();
    s.write_uint64(1);
    let before = s.write_pos();

    s.write_value(&nested_arrays(MAX_DEPTH))?;
    s.set_write_pos(before)?;

    assert_eq!(s.write_value(&nested_arrays(MAX_DEPTH + 1)), Err(Error::WriteOverflow));
    assert_eq!(s.write_pos(), before);
    assert_eq!(s.read_uint64()?, 1);
    s.release();
    Ok(())
}

#[test]
fn test_read_depth_limit() {
    let levels = MAX_DEPTH + 1;
    let mut s = Stream::new();
    for k in (2..=levels).rev() {
        let total = (1 + 5 * (k - 1)) as u32;
        let b = total.to_le_bytes();
        s.put_bytes(&[tag::ARRAY_EMPTY + 1, b[0], b[1], b[2], b[3]]);
    }
    s.put_bytes(&[tag::ARRAY_EMPTY]);

    assert_eq!(s.read_value(), Err(Error::ReadOverflow));
    assert_eq!(s.read_pos(), BODY_POS);
    // Skipping trusts the outer length and does not descend.
    assert_eq!(s.skip(), Ok(()));
    assert!(s.is_read_finish());
    s.release();
}

// ============================================================================
//  POSITION RECORDS
// ============================================================================

#[test]
fn test_array_records() -> Result<()> {
    let items = vec![
        Value::Int64(7),
        Value::Bytes(vec![1; FRAME_SIZE]),
        Value::String("tail".into()),
    ];
    let mut s = Stream::new();
    s.write_array(&items)?;
    s.write_nil();

    let records = s.read_array_records()?;
    assert_eq!(records.len(), 3);
    assert!(!records[0].needs_copy());
    assert!(records[1].needs_copy());
    for (record, item) in records.iter().zip(&items) {
        assert_eq!(&s.value_at(*record)?, item);
    }
    s.read_nil()?;
    assert!(s.is_read_finish());
    s.release();
    Ok(())
}

#[test]
fn test_map_records() -> Result<()> {
    let mut map = Map::new();
    map.insert("n".into(), Value::Uint64(3));
    map.insert("m".into(), Value::Map(Map::new()));
    let mut s = Stream::new();
    s.write_map(&map)?;

    let records = s.read_map_records()?;
    assert_eq!(records.len(), 2);
    assert_eq!(s.value_at(records["n"])?, Value::Uint64(3));
    assert_eq!(s.value_at(records["m"])?, Value::Map(Map::new()));
    assert_eq!(s.value_at(PosRecord::new(0, false)), Err(Error::InvalidPosition(0)));
    s.release();
    Ok(())
}

// ============================================================================
//  RANDOMIZED ROUND TRIPS
// ============================================================================

fn random_value(rng: &mut impl Rng, depth: usize) -> Value {
    let pick = if depth == 0 { rng.gen_range(0..7) } else { rng.gen_range(0..9) };
    match pick {
        0 => Value::Nil,
        1 => Value::Bool(rng.r#gen()),
        2 => Value::Int64(rng.r#gen::<i64>() >> rng.gen_range(0..64)),
        3 => Value::Uint64(rng.r#gen::<u64>() >> rng.gen_range(0..64)),
        4 => Value::Float64(rng.gen_range(-1e9..1e9)),
        5 => {
            let len = rng.gen_range(0..80);
            Value::String((0..len).map(|_| rng.gen_range('a'..='z')).collect())
        }
        6 => {
            let len = rng.gen_range(0..700);
            Value::Bytes((0..len).map(|_| rng.r#gen()).collect())
        }
        7 => {
            let len = rng.gen_range(0..40);
            Value::Array((0..len).map(|_| random_value(&mut *rng, depth - 1)).collect())
        }
        _ => {
            let len = rng.gen_range(0..40);
            Value::Map((0..len).map(|i| (format!("k{}", i), random_value(&mut *rng, depth - 1))).collect())
        }
    }
}

#[test]
fn test_random_roundtrip() -> Result<()> {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let values: Vec<Value> = (0..rng.gen_range(1..6)).map(|_| random_value(&mut rng, 3)).collect();
        let mut s = Stream::new();
        for v in &values {
            s.write_value(v)?;
        }
        let mut copy = Stream::from_bytes(&s.to_bytes())?;
        for v in &values {
            assert_eq!(&s.read_value()?, v);
            assert_eq!(&copy.read_value()?, v);
        }
        assert_eq!(s.read_pos(), s.write_pos());
        assert!(copy.is_read_finish());
        s.release();
        copy.release();
    }
    Ok(())
}

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_kind_codes() {
    let codes: String = Kind::ALL.iter().map(|k| k.code()).collect();
    assert_eq!(codes, "BIUFSXAM");
    for k in Kind::ALL {
        assert_eq!(Kind::from_code(k.code()), Some(k));
    }
    assert_eq!(Kind::from_code('Z'), None);
    assert_eq!(Value::from(3i64).type_name(), "Int");
    assert_eq!(Value::Nil.type_name(), "Nil");
    assert_eq!(Value::from("x").kind(), Some(Kind::String));
}
